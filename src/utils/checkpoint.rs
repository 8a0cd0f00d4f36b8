//! Checkpoint save/load utilities
//!
//! Weights for both networks plus a small JSON state file carrying the step
//! counter. Checkpoints live in a per-run subdirectory keyed by dataset name,
//! batch size and output resolution, so runs with different settings never
//! clobber each other.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Dcgan;
use crate::utils::Config;

// tch reserves the `.pt` extension for Python-pickle files and cannot read
// back its own VarStore output under that name; `.ot` is the tch-native
// extension that round-trips.
const GENERATOR_FILE: &str = "generator.ot";
const DISCRIMINATOR_FILE: &str = "discriminator.ot";
const STATE_FILE: &str = "state.json";

/// Training state persisted next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Global step counter at save time
    pub counter: i64,
}

/// Per-run checkpoint directory name.
pub fn model_dir(config: &Config) -> String {
    format!(
        "{}_{}_{}_{}",
        config.data.dataset_name,
        config.model.batch_size,
        config.model.output_height,
        config.model.output_width
    )
}

/// Checkpoint store rooted at `checkpoint_dir/model_dir`.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(config: &Config) -> Self {
        let dir = Path::new(&config.training.checkpoint_dir).join(model_dir(config));
        Self { dir }
    }

    /// Root directory of this store
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save both networks and the step counter.
    pub fn save(&self, model: &Dcgan, counter: i64) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let gen_path = self.dir.join(GENERATOR_FILE);
        let disc_path = self.dir.join(DISCRIMINATOR_FILE);
        model.save(
            gen_path.to_str().unwrap_or(GENERATOR_FILE),
            disc_path.to_str().unwrap_or(DISCRIMINATOR_FILE),
        )?;

        let state = CheckpointState { counter };
        let state_json = serde_json::to_string_pretty(&state)?;
        std::fs::write(self.dir.join(STATE_FILE), state_json)?;

        tracing::info!("saved checkpoint at step {} to {}", counter, self.dir.display());
        Ok(())
    }

    /// Restore weights into `model` if a checkpoint exists.
    ///
    /// Returns `Ok(None)` when no checkpoint is present; a missing checkpoint
    /// is a normal first-run condition, not an error.
    pub fn restore(&self, model: &mut Dcgan) -> anyhow::Result<Option<i64>> {
        let gen_path = self.dir.join(GENERATOR_FILE);
        let disc_path = self.dir.join(DISCRIMINATOR_FILE);
        let state_path = self.dir.join(STATE_FILE);

        if !gen_path.exists() || !disc_path.exists() {
            tracing::info!("no checkpoint found in {}", self.dir.display());
            return Ok(None);
        }

        model.load(
            gen_path.to_str().unwrap_or(GENERATOR_FILE),
            disc_path.to_str().unwrap_or(DISCRIMINATOR_FILE),
        )?;

        let counter = if state_path.exists() {
            let content = std::fs::read_to_string(&state_path)?;
            let state: CheckpointState = serde_json::from_str(&content)?;
            state.counter
        } else {
            0
        };

        tracing::info!(
            "restored checkpoint from {} (step {})",
            self.dir.display(),
            counter
        );
        Ok(Some(counter))
    }
}
