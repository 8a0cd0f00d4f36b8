//! Generator network
//!
//! Maps latent noise vectors to images in [-1, 1] through a linear projection
//! followed by four stride-2 transposed-convolution stages.

use tch::{nn, nn::Module, nn::ModuleT, Device, Kind, Tensor};

/// `ceil(size / stride)`, the inverse of a SAME-padded stride-2 stage.
pub fn conv_out_size_same(size: i64, stride: i64) -> i64 {
    (size + stride - 1) / stride
}

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Size of the latent noise vector
    pub z_dim: i64,
    /// Output image height
    pub output_height: i64,
    /// Output image width
    pub output_width: i64,
    /// Filters in the last deconvolution stage
    pub gf_dim: i64,
    /// Number of output channels
    pub c_dim: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            z_dim: 100,
            output_height: 64,
            output_width: 64,
            gf_dim: 64,
            c_dim: 3,
        }
    }
}

/// Spatial sizes of each stage, planned backward from the output resolution
/// so that non-power-of-two resolutions are supported.
#[derive(Debug, Clone)]
struct SizePlan {
    /// (height, width) from the initial projection volume up to the output
    stages: [(i64, i64); 5],
}

impl SizePlan {
    fn new(output_height: i64, output_width: i64) -> Self {
        let mut stages = [(output_height, output_width); 5];
        for i in (0..4).rev() {
            let (h, w) = stages[i + 1];
            stages[i] = (conv_out_size_same(h, 2), conv_out_size_same(w, 2));
        }
        Self { stages }
    }

    /// output_padding needed so the deconv into stage `i + 1` lands on at
    /// least the target size; any overshoot is trimmed afterwards.
    fn output_padding(&self, i: usize) -> i64 {
        let (in_h, in_w) = self.stages[i];
        let (out_h, out_w) = self.stages[i + 1];
        (out_h - 2 * in_h + 1).max(out_w - 2 * in_w + 1).max(0)
    }
}

/// Generator network
///
/// Architecture:
/// 1. Linear projection of z to an initial `8*gf_dim` spatial volume
/// 2. Four ConvTranspose2d stages, each with BatchNorm and ReLU except
///    the final stage which ends in Tanh
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    plan: SizePlan,
    fc: nn::Linear,
    bn0: nn::BatchNorm,
    deconv1: nn::ConvTranspose2D,
    bn1: nn::BatchNorm,
    deconv2: nn::ConvTranspose2D,
    bn2: nn::BatchNorm,
    deconv3: nn::ConvTranspose2D,
    bn3: nn::BatchNorm,
    deconv4: nn::ConvTranspose2D,
}

impl Generator {
    /// Create a new Generator network
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let gf = config.gf_dim;
        let plan = SizePlan::new(config.output_height, config.output_width);
        let (s16_h, s16_w) = plan.stages[0];

        let fc = nn::linear(
            vs / "g_h0_lin",
            config.z_dim,
            gf * 8 * s16_h * s16_w,
            Default::default(),
        );
        let bn0 = nn::batch_norm2d(vs / "g_bn0", gf * 8, Default::default());

        let stage_cfg = |stage: usize| nn::ConvTransposeConfig {
            stride: 2,
            padding: 2,
            output_padding: plan.output_padding(stage),
            ..Default::default()
        };

        let deconv1 = nn::conv_transpose2d(vs / "g_h1", gf * 8, gf * 4, 5, stage_cfg(0));
        let bn1 = nn::batch_norm2d(vs / "g_bn1", gf * 4, Default::default());
        let deconv2 = nn::conv_transpose2d(vs / "g_h2", gf * 4, gf * 2, 5, stage_cfg(1));
        let bn2 = nn::batch_norm2d(vs / "g_bn2", gf * 2, Default::default());
        let deconv3 = nn::conv_transpose2d(vs / "g_h3", gf * 2, gf, 5, stage_cfg(2));
        let bn3 = nn::batch_norm2d(vs / "g_bn3", gf, Default::default());
        let deconv4 = nn::conv_transpose2d(vs / "g_h4", gf, config.c_dim, 5, stage_cfg(3));

        Self {
            config,
            plan,
            fc,
            bn0,
            deconv1,
            bn1,
            deconv2,
            bn2,
            deconv3,
            bn3,
            deconv4,
        }
    }

    /// Generate images from noise
    ///
    /// # Arguments
    ///
    /// * `noise` - Tensor of shape (batch_size, z_dim)
    /// * `train` - Whether batch normalization updates its running statistics
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, c_dim, output_height, output_width)
    /// with values in [-1, 1].
    pub fn forward_t(&self, noise: &Tensor, train: bool) -> Tensor {
        let gf = self.config.gf_dim;
        let (s16_h, s16_w) = self.plan.stages[0];

        let x = self.fc.forward(noise);
        let x = x.view([-1, gf * 8, s16_h, s16_w]);
        let x = self.bn0.forward_t(&x, train).relu();

        let x = self.deconv1.forward(&x);
        let x = self.trim(x, 1);
        let x = self.bn1.forward_t(&x, train).relu();

        let x = self.deconv2.forward(&x);
        let x = self.trim(x, 2);
        let x = self.bn2.forward_t(&x, train).relu();

        let x = self.deconv3.forward(&x);
        let x = self.trim(x, 3);
        let x = self.bn3.forward_t(&x, train).relu();

        let x = self.deconv4.forward(&x);
        let x = self.trim(x, 4);
        x.tanh()
    }

    /// Inference-mode generation: identical weights, batch-norm running
    /// statistics read but never updated. Sampling for visualization and for
    /// FID goes through here so it cannot perturb the training statistics.
    pub fn sample(&self, noise: &Tensor) -> Tensor {
        self.forward_t(noise, false)
    }

    /// Draw standard-normal noise and generate
    pub fn sample_random(&self, num_samples: i64, device: Device) -> Tensor {
        let noise = Tensor::randn([num_samples, self.config.z_dim], (Kind::Float, device));
        self.sample(&noise)
    }

    /// Cut a deconv output down to the planned stage size. A stage with
    /// mixed height/width parity can overshoot one dimension by one pixel.
    fn trim(&self, x: Tensor, stage: usize) -> Tensor {
        let (h, w) = self.plan.stages[stage];
        let size = x.size();
        let x = if size[2] != h { x.narrow(2, 0, h) } else { x };
        if x.size()[3] != w {
            x.narrow(3, 0, w)
        } else {
            x
        }
    }

    /// Get configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;

    #[test]
    fn test_conv_out_size_same() {
        assert_eq!(conv_out_size_same(64, 2), 32);
        assert_eq!(conv_out_size_same(7, 2), 4);
        assert_eq!(conv_out_size_same(1, 2), 1);
    }

    #[test]
    fn test_generator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let config = GeneratorConfig::default();
        let gen = Generator::new(&vs.root(), config);

        let noise = Tensor::randn([4, 100], (Kind::Float, Device::Cpu));
        let output = gen.forward_t(&noise, true);

        assert_eq!(output.size(), vec![4, 3, 64, 64]);
    }

    #[test]
    fn test_generator_non_power_of_two_resolution() {
        let vs = VarStore::new(Device::Cpu);
        let config = GeneratorConfig {
            output_height: 108,
            output_width: 90,
            gf_dim: 8,
            ..Default::default()
        };
        let gen = Generator::new(&vs.root(), config);

        let noise = Tensor::randn([2, 100], (Kind::Float, Device::Cpu));
        let output = gen.sample(&noise);

        assert_eq!(output.size(), vec![2, 3, 108, 90]);
    }

    #[test]
    fn test_generator_output_range() {
        let vs = VarStore::new(Device::Cpu);
        let config = GeneratorConfig {
            gf_dim: 8,
            ..Default::default()
        };
        let gen = Generator::new(&vs.root(), config);

        let noise = Tensor::randn([2, 100], (Kind::Float, Device::Cpu));
        let output = gen.sample(&noise);

        let min: f64 = output.min().double_value(&[]);
        let max: f64 = output.max().double_value(&[]);
        assert!(min >= -1.0 && max <= 1.0);
    }

    #[test]
    fn test_sampler_shares_weights_without_stat_updates() {
        let vs = VarStore::new(Device::Cpu);
        let gen = Generator::new(
            &vs.root(),
            GeneratorConfig {
                gf_dim: 8,
                ..Default::default()
            },
        );

        let noise = Tensor::randn([4, 100], (Kind::Float, Device::Cpu));
        let before = gen.sample(&noise);
        // Inference passes must be deterministic: running stats untouched.
        let again = gen.sample(&noise);
        let diff: f64 = (&before - &again).abs().max().double_value(&[]);
        assert!(diff < 1e-6);
    }
}
