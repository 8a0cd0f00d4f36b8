//! DCGAN wrapper combining Generator and Discriminator
//!
//! Owns one `VarStore` per network. The stores are disjoint by construction,
//! so a discriminator update can never touch a generator parameter and vice
//! versa; each optimizer is built over exactly one store.

use anyhow::Result;
use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};

/// Complete DCGAN model
pub struct Dcgan {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    /// Variable store owning the generator parameters
    pub gen_vs: VarStore,
    /// Variable store owning the discriminator parameters
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
}

impl Dcgan {
    /// Create a new DCGAN model
    pub fn new(
        gen_config: GeneratorConfig,
        disc_config: DiscriminatorConfig,
        device: Device,
    ) -> Self {
        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);

        let generator = Generator::new(&gen_vs.root(), gen_config);
        let discriminator = Discriminator::new(&disc_vs.root(), disc_config);

        Self {
            generator,
            discriminator,
            gen_vs,
            disc_vs,
            device,
        }
    }

    /// Build from the shared model configuration
    pub fn from_config(config: &crate::utils::ModelConfig, device: Device) -> Self {
        let gen_config = GeneratorConfig {
            z_dim: config.z_dim,
            output_height: config.output_height,
            output_width: config.output_width,
            gf_dim: config.gf_dim,
            c_dim: config.c_dim,
        };
        let disc_config = DiscriminatorConfig {
            input_height: config.output_height,
            input_width: config.output_width,
            df_dim: config.df_dim,
            c_dim: config.c_dim,
            batch_norm: config.discriminator_batch_norm,
        };
        Self::new(gen_config, disc_config, device)
    }

    /// Draw a standard-normal latent batch
    pub fn latent_batch(&self, batch_size: i64) -> Tensor {
        Tensor::randn(
            [batch_size, self.generator.config().z_dim],
            (Kind::Float, self.device),
        )
    }

    /// Generator optimizer (Adam with GAN momentum defaults)
    pub fn gen_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        let opt = nn::Adam {
            beta1,
            beta2: 0.999,
            wd: 0.0,
            ..Default::default()
        }
        .build(&self.gen_vs, lr)?;
        Ok(opt)
    }

    /// Discriminator optimizer (Adam with GAN momentum defaults)
    pub fn disc_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        let opt = nn::Adam {
            beta1,
            beta2: 0.999,
            wd: 0.0,
            ..Default::default()
        }
        .build(&self.disc_vs, lr)?;
        Ok(opt)
    }

    /// Save both parameter sets
    pub fn save(&self, gen_path: &str, disc_path: &str) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.disc_vs.save(disc_path)?;
        Ok(())
    }

    /// Load both parameter sets
    pub fn load(&mut self, gen_path: &str, disc_path: &str) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.disc_vs.load(disc_path)?;
        Ok(())
    }

    /// Latent dimension
    pub fn z_dim(&self) -> i64 {
        self.generator.config().z_dim
    }

    /// Output image height
    pub fn output_height(&self) -> i64 {
        self.generator.config().output_height
    }

    /// Output image width
    pub fn output_width(&self) -> i64 {
        self.generator.config().output_width
    }

    /// Number of image channels
    pub fn c_dim(&self) -> i64 {
        self.generator.config().c_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model() -> Dcgan {
        Dcgan::new(
            GeneratorConfig {
                gf_dim: 8,
                ..Default::default()
            },
            DiscriminatorConfig {
                df_dim: 8,
                ..Default::default()
            },
            Device::Cpu,
        )
    }

    #[test]
    fn test_dcgan_creation() {
        let model = small_model();
        assert_eq!(model.z_dim(), 100);
        assert_eq!(model.output_height(), 64);
        assert_eq!(model.c_dim(), 3);
    }

    #[test]
    fn test_dcgan_generate_and_discriminate() {
        let model = small_model();
        let samples = model.generator.sample(&model.latent_batch(4));
        assert_eq!(samples.size(), vec![4, 3, 64, 64]);

        let probs = model.discriminator.classify(&samples);
        assert_eq!(probs.size(), vec![4, 1]);
    }

    #[test]
    fn test_parameter_stores_disjoint() {
        let model = small_model();
        let gen_vars = model.gen_vs.variables();
        let disc_vars = model.disc_vs.variables();
        assert!(!gen_vars.is_empty());
        assert!(!disc_vars.is_empty());
        for name in gen_vars.keys() {
            assert!(!disc_vars.contains_key(name));
        }
    }
}
