//! Training module
//!
//! This module provides:
//! - The training loop with periodic summaries, FID evaluation and checkpoints
//! - The three interchangeable adversarial loss regimes
//! - CSV-backed scalar summaries and rolling diagnostics

mod losses;
mod summary;
mod trainer;

pub use losses::{LossEngine, StepLosses};
pub use summary::{DiagnosticsWindow, LossSnapshot, SummaryWriter};
pub use trainer::{batches_per_epoch, FidContext, Trainer};
