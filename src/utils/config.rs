//! Configuration management
//!
//! Provides unified configuration for the entire training pipeline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Adversarial loss regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GanMethod {
    /// Vanilla minimax GAN with sigmoid cross-entropy losses.
    #[default]
    RegularGan,
    /// Wasserstein GAN with full-range interpolation gradient penalty.
    ImprovedWgan,
    /// Wasserstein GAN with Lipschitz penalty and analytic target slopes.
    PenalizedWgan,
}

impl FromStr for GanMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular_gan" => Ok(GanMethod::RegularGan),
            "improved_wgan" => Ok(GanMethod::ImprovedWgan),
            "penalized_wgan" => Ok(GanMethod::PenalizedWgan),
            other => anyhow::bail!(
                "the gan method must be 'penalized_wgan', 'improved_wgan' or 'regular_gan', not '{}'",
                other
            ),
        }
    }
}

impl fmt::Display for GanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GanMethod::RegularGan => "regular_gan",
            GanMethod::ImprovedWgan => "improved_wgan",
            GanMethod::PenalizedWgan => "penalized_wgan",
        };
        write!(f, "{name}")
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfig,
    /// FID evaluation configuration
    pub fid: FidConfig,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory containing the training images
    pub data_path: String,
    /// Dataset name, also keys the checkpoint directory
    pub dataset_name: String,
    /// Filename pattern for training images (e.g. "*.jpg")
    pub input_fname_pattern: String,
    /// Path to the precomputed real-data FID statistics (.npz with mu/sigma)
    pub stats_path: String,
    /// Number of background loader threads
    pub loader_threads: usize,
    /// Bounded prefetch queue depth, in batches
    pub queue_depth: usize,
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Batch size used for training
    pub batch_size: i64,
    /// Number of images in the periodic sample grid
    pub sample_num: i64,
    /// Output image height
    pub output_height: i64,
    /// Output image width
    pub output_width: i64,
    /// Latent dimension size
    pub z_dim: i64,
    /// Generator filters in the last deconv layer
    pub gf_dim: i64,
    /// Discriminator filters in the first conv layer
    pub df_dim: i64,
    /// Number of image channels (3 for RGB)
    pub c_dim: i64,
    /// Conditional label dimension; conditional generation is unsupported
    pub y_dim: Option<i64>,
    /// Adversarial loss regime
    pub gan_method: GanMethod,
    /// Weight of the Lipschitz penalty (penalized_wgan)
    pub lipschitz_penalty: f64,
    /// Weight of the gradient penalty (penalized_wgan, improved_wgan)
    pub gradient_penalty: f64,
    /// When learning the generator, also optimize (increase) the penalty
    pub optimize_penalty: bool,
    /// Explicitly calculate the per-sample target slope, otherwise 1/(2*lambda)
    pub calculate_slope: bool,
    /// Batch normalization on the inner discriminator stages
    pub discriminator_batch_norm: bool,
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of epochs
    pub epochs: usize,
    /// Cap on the number of samples consumed per epoch
    pub train_size: usize,
    /// Discriminator learning rate
    pub learning_rate_d: f64,
    /// Generator learning rate; zero disables generator updates
    pub learning_rate_g: f64,
    /// Adam first-moment coefficient
    pub beta1: f64,
    /// Discriminator optimizer applications per outer step
    pub num_discriminator_updates: usize,
    /// Initial value of the step counter
    pub counter_start: i64,
    /// Restore from an existing checkpoint before training
    pub load_checkpoint: bool,
    /// Root directory for checkpoints
    pub checkpoint_dir: String,
    /// Save a checkpoint every N steps
    pub checkpoint_every: i64,
    /// Directory for periodic sample grids
    pub sample_dir: String,
    /// Directory for the scalar summary log
    pub log_dir: String,
    /// Device: "cpu" or "cuda"
    pub device: String,
}

/// FID-evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FidConfig {
    /// Total number of generated samples per evaluation
    pub n_samples: i64,
    /// Generator sub-batch size while drawing FID samples
    pub sample_batchsize: i64,
    /// Feature-extractor batch size
    pub batch_size: i64,
    /// Run an evaluation every N steps
    pub eval_steps: i64,
    /// Path to the TorchScript feature extractor
    pub extractor_path: String,
    /// Log per-batch extractor progress
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                data_path: "data".to_string(),
                dataset_name: "default".to_string(),
                input_fname_pattern: "*.jpg".to_string(),
                stats_path: "stats/real_stats.npz".to_string(),
                loader_threads: 4,
                queue_depth: 8,
            },
            model: ModelConfig {
                batch_size: 64,
                sample_num: 64,
                output_height: 64,
                output_width: 64,
                z_dim: 100,
                gf_dim: 64,
                df_dim: 64,
                c_dim: 3,
                y_dim: None,
                gan_method: GanMethod::RegularGan,
                lipschitz_penalty: 0.1,
                gradient_penalty: 0.1,
                optimize_penalty: false,
                calculate_slope: true,
                discriminator_batch_norm: true,
            },
            training: TrainingConfig {
                epochs: 25,
                // Effectively unbounded while staying TOML-serializable.
                train_size: i64::MAX as usize,
                learning_rate_d: 2e-4,
                learning_rate_g: 2e-4,
                beta1: 0.5,
                num_discriminator_updates: 1,
                counter_start: 0,
                load_checkpoint: false,
                checkpoint_dir: "checkpoints".to_string(),
                checkpoint_every: 2000,
                sample_dir: "samples".to_string(),
                log_dir: "logs".to_string(),
                device: "cpu".to_string(),
            },
            fid: FidConfig {
                n_samples: 10000,
                sample_batchsize: 5000,
                batch_size: 500,
                eval_steps: 1000,
                extractor_path: "stats/inception.pt".to_string(),
                verbose: false,
            },
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Validate configuration invariants.
    ///
    /// All violations here are fatal configuration errors, raised before any
    /// training step executes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.lipschitz_penalty < 0.0 {
            anyhow::bail!("the lipschitz penalty must be non-negative");
        }
        if self.model.gradient_penalty < 0.0 {
            anyhow::bail!("the gradient penalty must be non-negative");
        }
        if self.training.num_discriminator_updates < 1 {
            anyhow::bail!("num_discriminator_updates must be at least 1");
        }
        if self.model.y_dim.is_some() {
            anyhow::bail!("conditional GAN generation is not supported");
        }
        if self.model.batch_size <= 0 {
            anyhow::bail!("batch size must be > 0");
        }
        if self.model.z_dim <= 0 {
            anyhow::bail!("latent dimension must be > 0");
        }
        if self.model.output_height <= 0 || self.model.output_width <= 0 {
            anyhow::bail!("output resolution must be > 0");
        }
        if self.training.epochs == 0 {
            anyhow::bail!("number of epochs must be > 0");
        }
        if self.fid.sample_batchsize <= 0 || self.fid.n_samples <= 0 {
            anyhow::bail!("FID sampling parameters must be > 0");
        }
        Ok(())
    }

    /// Adjust `fid.n_samples` down to a multiple of `fid.sample_batchsize`.
    ///
    /// The batched FID sampler fills the sample buffer in whole sub-batches,
    /// so a non-multiple total would leave a partially written tail.
    pub fn normalize(&mut self) {
        if self.fid.n_samples % self.fid.sample_batchsize != 0 {
            let n_batches = self.fid.n_samples / self.fid.sample_batchsize;
            let n_old = self.fid.n_samples;
            self.fid.n_samples = n_batches * self.fid.sample_batchsize;
            tracing::warn!(
                "fid n_samples is not a multiple of fid sample_batchsize, \
                 number of generated samples adjusted from {} to {}",
                n_old,
                self.fid.n_samples
            );
        }
    }
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        if path.ends_with(".toml") {
            Config::from_toml(path)
        } else {
            Config::from_json(path)
        }
    } else {
        let config = Config::default();
        if path.ends_with(".toml") {
            config.save_toml(path)?;
        } else {
            config.save_json(path)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.gan_method, GanMethod::RegularGan);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = Config::default();
        config.model.gan_method = GanMethod::PenalizedWgan;
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.model.gan_method, GanMethod::PenalizedWgan);
        assert_eq!(loaded.model.batch_size, config.model.batch_size);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let loaded: Config = toml::from_str(&text).unwrap();

        assert_eq!(loaded.training.train_size, config.training.train_size);
        assert_eq!(loaded.fid.eval_steps, config.fid.eval_steps);
    }

    #[test]
    fn test_gan_method_parse() {
        assert_eq!(
            "improved_wgan".parse::<GanMethod>().unwrap(),
            GanMethod::ImprovedWgan
        );
        assert!("bogus".parse::<GanMethod>().is_err());
    }

    #[test]
    fn test_invalid_penalty_weight() {
        let mut config = Config::default();
        config.model.lipschitz_penalty = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conditional_generation_rejected() {
        let mut config = Config::default();
        config.model.y_dim = Some(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_num_discriminator_updates_floor() {
        let mut config = Config::default();
        config.training.num_discriminator_updates = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fid_n_samples_adjustment() {
        let mut config = Config::default();
        config.fid.n_samples = 10000;
        config.fid.sample_batchsize = 3000;
        config.normalize();
        assert_eq!(config.fid.n_samples, 9000);
    }
}
