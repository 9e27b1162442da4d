// ============================================================
// Layer 2 — ExportUseCase
// ============================================================
// Restores a bundle, picks one checkpoint and copies the
// minimal file set needed to rebuild that model elsewhere:
//
//   <dest>/training_args.json
//   <dest>/config.json
//   <dest>/models/best_by_<x>/epoch=<N>-step=<S>.ckpt
//
// Restoring (rather than copying files blindly) checks that the
// weights actually load into the recorded architecture.

use anyhow::{Context, Result};
use burn::backend::NdArray;
use std::path::PathBuf;

use crate::domain::options::BestBy;
use crate::ml::restore::{from_dir, LoadOptions};

type ExportBackend = NdArray<f32>;

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub bundle_dir: PathBuf,
    pub dest:       PathBuf,
    pub best_by:    BestBy,
    pub idx:        isize,
}

pub struct ExportUseCase {
    config: ExportConfig,
}

impl ExportUseCase {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Returns the checkpoint that was exported.
    pub fn execute(&self) -> Result<PathBuf> {
        let cfg = &self.config;
        let opts = LoadOptions {
            best_by: cfg.best_by,
            idx:     cfg.idx,
            copy_to: Some(cfg.dest.clone()),
            ..LoadOptions::default()
        };

        let restored = from_dir::<ExportBackend>(&cfg.bundle_dir, opts, &Default::default())
            .with_context(|| format!("Cannot restore bundle '{}'", cfg.bundle_dir.display()))?;
        tracing::info!(
            "Restored {}-channel model ({} decoder, {} time encoding)",
            restored.model.n_inputs(),
            restored.model.decoder_head().as_str(),
            restored.model.time_encoding().as_str(),
        );

        restored
            .checkpoint
            .context("No checkpoint was selected for export")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{CheckpointManager, TrainingArgs};
    use crate::ml::model::{BertConfig, DiffusionModelConfig};
    use serde_json::Map;

    #[test]
    fn test_export_copies_selected_checkpoint() {
        let bundle = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(bundle.path());

        let bert = BertConfig::new()
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16);
        manager
            .save_training_args(&TrainingArgs {
                angles_definitions: "cart-coords".to_string(),
                time_encoding:      "gaussian_fourier".to_string(),
                decoder:            "linear".to_string(),
                lr:                 1e-4,
                loss:               "l1".to_string(),
                l2_norm:            0.0,
                l1_norm:            0.0,
                circle_reg:         0.0,
                min_epochs:         2,
                lr_scheduler:       None,
                extra:              Map::new(),
            })
            .unwrap();
        manager.save_config(&bert).unwrap();

        let model = DiffusionModelConfig::new(bert, vec![false; 3])
            .with_decoder(crate::domain::options::DecoderHead::Linear)
            .init::<ExportBackend>(&Default::default())
            .unwrap();
        manager.write_checkpoint(&model, BestBy::Train, 0, 5).unwrap();
        manager.write_checkpoint(&model, BestBy::Train, 1, 10).unwrap();

        let exported = ExportUseCase::new(ExportConfig {
            bundle_dir: bundle.path().to_path_buf(),
            dest:       dest.path().to_path_buf(),
            best_by:    BestBy::Train,
            idx:        0,
        })
        .execute()
        .unwrap();

        assert_eq!(exported.file_name().unwrap(), "epoch=0-step=5.ckpt");
        assert!(dest
            .path()
            .join("models/best_by_train/epoch=0-step=5.ckpt")
            .is_file());
        assert!(!dest
            .path()
            .join("models/best_by_train/epoch=1-step=10.ckpt")
            .exists());
    }
}
