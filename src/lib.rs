//! # DCGAN Image Generator with FID Evaluation
//!
//! This crate provides a modular implementation of Deep Convolutional
//! Generative Adversarial Networks (DCGAN) for image generation, with three
//! interchangeable adversarial loss regimes and periodic Fréchet Inception
//! Distance evaluation during training.
//!
//! ## Modules
//!
//! - `data`: Image-folder scanning and background batch feeding
//! - `model`: DCGAN architecture (Generator and Discriminator)
//! - `training`: Training loop, loss regimes and scalar summaries
//! - `fid`: Activation statistics and the Fréchet distance
//! - `utils`: Configuration, checkpoints and sample-grid rendering

pub mod data;
pub mod fid;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{BatchFeeder, ImageFolder};
pub use model::{Dcgan, Discriminator, Generator};
pub use training::{LossEngine, StepLosses, Trainer};
pub use utils::{CheckpointStore, Config, GanMethod};
