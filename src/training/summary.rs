//! Scalar training summaries
//!
//! Step-tagged loss scalars go to a CSV log, flushed in small groups so a
//! crash loses at most a few rows. A rolling window aggregates the same
//! scalars for periodic console reporting.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};

use super::losses::StepLosses;

/// Write buffered rows to disk after this many records.
const FLUSH_EVERY: usize = 20;

/// Plain-number snapshot of one step's losses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossSnapshot {
    pub d_loss: f64,
    pub g_loss: f64,
    pub d_loss_real: f64,
    pub d_loss_fake: f64,
    pub lipschitz_penalty: f64,
    pub gradient_penalty: f64,
    pub slope_target_mean: f64,
    pub lipschitz_estimate: f64,
}

impl LossSnapshot {
    pub fn from_losses(losses: &StepLosses) -> Self {
        Self {
            d_loss: losses.d_loss.double_value(&[]),
            g_loss: losses.g_loss.double_value(&[]),
            d_loss_real: losses.d_loss_real.double_value(&[]),
            d_loss_fake: losses.d_loss_fake.double_value(&[]),
            lipschitz_penalty: losses.lipschitz_penalty.double_value(&[]),
            gradient_penalty: losses.gradient_penalty.double_value(&[]),
            slope_target_mean: losses.slope_target_mean.double_value(&[]),
            lipschitz_estimate: losses.lipschitz_estimate.double_value(&[]),
        }
    }
}

/// CSV-backed scalar sink: one file for per-step losses, one for the
/// sparse FID series.
pub struct SummaryWriter {
    scalars: csv::Writer<File>,
    fid: csv::Writer<File>,
    pending: usize,
}

impl SummaryWriter {
    pub fn create(log_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("cannot create log directory {log_dir}"))?;

        let scalars_path = Path::new(log_dir).join("scalars.csv");
        let mut scalars = csv::Writer::from_path(&scalars_path)
            .with_context(|| format!("cannot open {}", scalars_path.display()))?;
        scalars.write_record([
            "step",
            "d_loss",
            "g_loss",
            "d_loss_real",
            "d_loss_fake",
            "lipschitz_penalty",
            "gradient_penalty",
            "slope_target_mean",
            "lipschitz_estimate",
        ])?;

        let fid_path = Path::new(log_dir).join("fid.csv");
        let mut fid = csv::Writer::from_path(&fid_path)
            .with_context(|| format!("cannot open {}", fid_path.display()))?;
        fid.write_record(["step", "fid"])?;
        fid.flush()?;

        Ok(Self {
            scalars,
            fid,
            pending: 0,
        })
    }

    /// Append one step's losses; flushed every [`FLUSH_EVERY`] records.
    pub fn record(&mut self, step: i64, snapshot: &LossSnapshot) -> Result<()> {
        self.scalars.write_record([
            step.to_string(),
            snapshot.d_loss.to_string(),
            snapshot.g_loss.to_string(),
            snapshot.d_loss_real.to_string(),
            snapshot.d_loss_fake.to_string(),
            snapshot.lipschitz_penalty.to_string(),
            snapshot.gradient_penalty.to_string(),
            snapshot.slope_target_mean.to_string(),
            snapshot.lipschitz_estimate.to_string(),
        ])?;

        self.pending += 1;
        if self.pending >= FLUSH_EVERY {
            self.flush()?;
        }
        Ok(())
    }

    /// Append one FID measurement; the FID series is sparse, so every row is
    /// flushed immediately.
    pub fn record_fid(&mut self, step: i64, fid: f64) -> Result<()> {
        self.fid.write_record([step.to_string(), fid.to_string()])?;
        self.fid.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        self.pending = 0;
        Ok(())
    }
}

/// Rolling mean of losses between console reports.
#[derive(Debug, Default)]
pub struct DiagnosticsWindow {
    d_loss_sum: f64,
    g_loss_sum: f64,
    penalty_sum: f64,
    count: usize,
}

impl DiagnosticsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: &LossSnapshot) {
        self.d_loss_sum += snapshot.d_loss;
        self.g_loss_sum += snapshot.g_loss;
        self.penalty_sum += snapshot.lipschitz_penalty + snapshot.gradient_penalty;
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean_d_loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.d_loss_sum / self.count as f64
        }
    }

    pub fn mean_g_loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.g_loss_sum / self.count as f64
        }
    }

    pub fn mean_penalty(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.penalty_sum / self.count as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(d: f64, g: f64) -> LossSnapshot {
        LossSnapshot {
            d_loss: d,
            g_loss: g,
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_writer_produces_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path().to_str().unwrap();

        let mut writer = SummaryWriter::create(log_dir).unwrap();
        for step in 0..5 {
            writer.record(step, &snapshot(0.5, 1.5)).unwrap();
        }
        writer.record_fid(4, 123.4).unwrap();
        writer.flush().unwrap();

        let scalars = std::fs::read_to_string(tmp.path().join("scalars.csv")).unwrap();
        assert_eq!(scalars.lines().count(), 6); // header + 5 rows
        assert!(scalars.lines().next().unwrap().starts_with("step,d_loss"));

        let fid = std::fs::read_to_string(tmp.path().join("fid.csv")).unwrap();
        assert!(fid.contains("4,123.4"));
    }

    #[test]
    fn test_diagnostics_window_means_and_reset() {
        let mut window = DiagnosticsWindow::new();
        window.push(&snapshot(1.0, 2.0));
        window.push(&snapshot(3.0, 4.0));

        assert_eq!(window.len(), 2);
        assert_eq!(window.mean_d_loss(), 2.0);
        assert_eq!(window.mean_g_loss(), 3.0);

        window.reset();
        assert!(window.is_empty());
        assert_eq!(window.mean_d_loss(), 0.0);
    }
}
