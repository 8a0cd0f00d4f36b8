//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities
//! - Sample-grid visualization helpers

mod checkpoint;
mod config;
mod visualize;

pub use checkpoint::{model_dir, CheckpointStore};
pub use config::{
    ensure_config_exists, Config, DataConfig, FidConfig, GanMethod, ModelConfig, TrainingConfig,
};
pub use visualize::{save_image_grid, tile_images};
