//! Data module for discovering and feeding training images
//!
//! This module provides:
//! - Image-folder scanning with a fail-fast empty-dataset check
//! - Background worker threads prefetching batches into a bounded queue

mod feeder;
mod folder;

pub use feeder::BatchFeeder;
pub use folder::ImageFolder;
