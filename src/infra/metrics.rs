// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records one CSV row per epoch in the bundle directory, next
// to the per-step metrics emitted as tracing events.
//
// Output file: <bundle>/metrics.csv
//
//   epoch,train_loss,val_loss,lr,elapsed_secs
//   1,1.204511,1.187302,0.000050,12.402
//   2,0.981220,0.990114,0.000050,11.978
//
// The file is opened in append mode, so a resumed run keeps the
// rows of the earlier one.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

pub const METRICS_FILE: &str = "metrics.csv";
const HEADER: &str = "epoch,train_loss,val_loss,lr,elapsed_secs";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch:        usize,
    /// Mean aggregate loss over the epoch's training steps
    pub train_loss:   f64,
    /// Mean aggregate loss over the epoch's validation steps
    pub val_loss:     f64,
    /// Learning rate used for the last step of the epoch
    pub lr:           f64,
    pub elapsed_secs: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, lr: f64, elapsed_secs: f64) -> Self {
        Self { epoch, train_loss, val_loss, lr, elapsed_secs }
    }

    /// True if the validation loss beat `best_val_loss` (NaN never does).
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join(METRICS_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6e},{:.3}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.lr,
            m.elapsed_secs,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
