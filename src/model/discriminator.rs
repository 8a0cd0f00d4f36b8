//! Discriminator network
//!
//! Classifies images as real or fake through four stride-2 convolution
//! stages and a final linear projection to a single logit.

use tch::{nn, nn::Module, nn::ModuleT, Tensor};

use super::generator::conv_out_size_same;

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Input image height
    pub input_height: i64,
    /// Input image width
    pub input_width: i64,
    /// Filters in the first convolution stage
    pub df_dim: i64,
    /// Number of input channels
    pub c_dim: i64,
    /// Batch normalization on the inner three stages
    pub batch_norm: bool,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            input_height: 64,
            input_width: 64,
            df_dim: 64,
            c_dim: 3,
            batch_norm: true,
        }
    }
}

/// Leaky ReLU with the 0.2 slope conventional for DCGAN discriminators.
fn lrelu(x: &Tensor) -> Tensor {
    x.maximum(&(x * 0.2))
}

/// Discriminator network
///
/// One parameter set, callable any number of times within a step (real,
/// fake and interpolated batches all share the same weights).
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    bn1: Option<nn::BatchNorm>,
    conv3: nn::Conv2D,
    bn2: Option<nn::BatchNorm>,
    conv4: nn::Conv2D,
    bn3: Option<nn::BatchNorm>,
    fc: nn::Linear,
}

impl Discriminator {
    /// Create a new Discriminator network
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let df = config.df_dim;
        let conv_cfg = nn::ConvConfig {
            stride: 2,
            padding: 2,
            ..Default::default()
        };

        let conv1 = nn::conv2d(vs / "d_h0_conv", config.c_dim, df, 5, conv_cfg);
        let conv2 = nn::conv2d(vs / "d_h1_conv", df, df * 2, 5, conv_cfg);
        let conv3 = nn::conv2d(vs / "d_h2_conv", df * 2, df * 4, 5, conv_cfg);
        let conv4 = nn::conv2d(vs / "d_h3_conv", df * 4, df * 8, 5, conv_cfg);

        let (bn1, bn2, bn3) = if config.batch_norm {
            (
                Some(nn::batch_norm2d(vs / "d_bn1", df * 2, Default::default())),
                Some(nn::batch_norm2d(vs / "d_bn2", df * 4, Default::default())),
                Some(nn::batch_norm2d(vs / "d_bn3", df * 8, Default::default())),
            )
        } else {
            (None, None, None)
        };

        // Each stride-2 stage maps size -> ceil(size / 2).
        let mut h = config.input_height;
        let mut w = config.input_width;
        for _ in 0..4 {
            h = conv_out_size_same(h, 2);
            w = conv_out_size_same(w, 2);
        }
        let flat_size = df * 8 * h * w;
        let fc = nn::linear(vs / "d_h3_lin", flat_size, 1, Default::default());

        Self {
            config,
            conv1,
            conv2,
            bn1,
            conv3,
            bn2,
            conv4,
            bn3,
            fc,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `images` - Tensor of shape (batch_size, c_dim, height, width)
    /// * `train` - Whether batch normalization updates its running statistics
    ///
    /// # Returns
    ///
    /// `(probability, logit)`, each of shape (batch_size, 1); the
    /// probability is the logit's sigmoid.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> (Tensor, Tensor) {
        let x = lrelu(&self.conv1.forward(images));
        let x = self.conv2.forward(&x);
        let x = lrelu(&self.apply_bn(&self.bn1, x, train));
        let x = self.conv3.forward(&x);
        let x = lrelu(&self.apply_bn(&self.bn2, x, train));
        let x = self.conv4.forward(&x);
        let x = lrelu(&self.apply_bn(&self.bn3, x, train));

        let batch_size = x.size()[0];
        let logit = self.fc.forward(&x.view([batch_size, -1]));
        (logit.sigmoid(), logit)
    }

    fn apply_bn(&self, bn: &Option<nn::BatchNorm>, x: Tensor, train: bool) -> Tensor {
        match bn {
            Some(bn) => bn.forward_t(&x, train),
            None => x,
        }
    }

    /// Classify samples in inference mode, returning the probability of real
    pub fn classify(&self, images: &Tensor) -> Tensor {
        self.forward_t(images, false).0
    }

    /// Get configuration
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn test_discriminator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            df_dim: 8,
            ..Default::default()
        };
        let disc = Discriminator::new(&vs.root(), config);

        let input = Tensor::randn([4, 3, 64, 64], (Kind::Float, Device::Cpu));
        let (prob, logit) = disc.forward_t(&input, false);

        assert_eq!(prob.size(), vec![4, 1]);
        assert_eq!(logit.size(), vec![4, 1]);
    }

    #[test]
    fn test_discriminator_probability_range() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(
            &vs.root(),
            DiscriminatorConfig {
                df_dim: 8,
                batch_norm: false,
                ..Default::default()
            },
        );

        let input = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let probs = disc.classify(&input);

        let min: f64 = probs.min().double_value(&[]);
        let max: f64 = probs.max().double_value(&[]);
        assert!(min >= 0.0 && max <= 1.0);
    }

    #[test]
    fn test_discriminator_reuse_no_new_parameters() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(
            &vs.root(),
            DiscriminatorConfig {
                df_dim: 8,
                ..Default::default()
            },
        );
        let n_vars = vs.variables().len();

        let input = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let _ = disc.forward_t(&input, true);
        let _ = disc.forward_t(&input, true);
        let _ = disc.forward_t(&input, true);

        assert_eq!(vs.variables().len(), n_vars);
    }

    #[test]
    fn test_discriminator_non_square_input() {
        let vs = VarStore::new(Device::Cpu);
        let disc = Discriminator::new(
            &vs.root(),
            DiscriminatorConfig {
                input_height: 108,
                input_width: 90,
                df_dim: 8,
                ..Default::default()
            },
        );

        let input = Tensor::randn([2, 3, 108, 90], (Kind::Float, Device::Cpu));
        let (prob, _) = disc.forward_t(&input, false);
        assert_eq!(prob.size(), vec![2, 1]);
    }
}
