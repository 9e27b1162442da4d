// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run end to end:
//
//   Step 1: Resolve the angle definition   (Layer 3 - domain)
//   Step 2: Load pre-noised samples        (Layer 4 - data)
//   Step 3: Split train/validation         (Layer 4 - data)
//   Step 4: Write training_args.json and
//           config.json into the bundle    (Layer 6 - infra)
//   Step 5: Build the trainer              (Layer 5 - ml)
//   Step 6: Run the training loop          (Layer 5 - ml)
//
// The bundle written here is exactly what `export` and
// ml::restore::from_dir read back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::data::{
    dataset::NoisedDataset,
    loader::JsonlLoader,
    splitter::split_train_val,
};
use crate::domain::{
    angles::ft_is_angular_for,
    options::{DecoderHead, TimeEncoding},
};
use crate::infra::checkpoint::{CheckpointManager, TrainingArgs};
use crate::ml::{
    model::{BertConfig, DiffusionModelConfig},
    restore::training_options_from_args,
    trainer::{run_training, DiffusionTrainer, LoopConfig},
};

// ─── Training Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_path:               PathBuf,
    pub out_dir:                 PathBuf,
    pub angles_definitions:      String,
    pub ft_names:                Option<Vec<String>>,
    pub time_encoding:           String,
    pub decoder:                 String,
    pub loss:                    String,
    pub lr:                      f64,
    pub l1_norm:                 f64,
    pub l2_norm:                 f64,
    pub circle_reg:              f64,
    pub epochs:                  usize,
    pub lr_scheduler:            Option<String>,
    pub batch_size:              usize,
    pub train_fraction:          f64,
    pub seed:                    u64,
    pub num_workers:             usize,
    pub write_valid_preds:       bool,
    pub hidden_size:             usize,
    pub num_hidden_layers:       usize,
    pub num_attention_heads:     usize,
    pub intermediate_size:       usize,
    pub dropout:                 f64,
    pub max_position_embeddings: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_path:               PathBuf::from("data/train.jsonl"),
            out_dir:                 PathBuf::from("results"),
            angles_definitions:      "canonical-full-angles".to_string(),
            ft_names:                None,
            time_encoding:           TimeEncoding::GaussianFourier.as_str().to_string(),
            decoder:                 DecoderHead::Mlp.as_str().to_string(),
            loss:                    "smooth_l1".to_string(),
            lr:                      5e-5,
            l1_norm:                 0.0,
            l2_norm:                 0.0,
            circle_reg:              0.0,
            epochs:                  10000,
            lr_scheduler:            Some("LinearWarmup".to_string()),
            batch_size:              64,
            train_fraction:          0.9,
            seed:                    6489,
            num_workers:             1,
            write_valid_preds:       false,
            hidden_size:             384,
            num_hidden_layers:       12,
            num_attention_heads:     12,
            intermediate_size:       768,
            dropout:                 0.1,
            max_position_embeddings: 128,
        }
    }
}

impl TrainConfig {
    pub fn bert_config(&self) -> BertConfig {
        BertConfig::new()
            .with_hidden_size(self.hidden_size)
            .with_num_hidden_layers(self.num_hidden_layers)
            .with_num_attention_heads(self.num_attention_heads)
            .with_intermediate_size(self.intermediate_size)
            .with_hidden_dropout_prob(self.dropout)
            .with_attention_probs_dropout_prob(self.dropout)
            .with_max_position_embeddings(self.max_position_embeddings)
    }

    /// What gets persisted as training_args.json. Run settings that
    /// restoring does not need go into the extra keys.
    pub fn training_args(&self) -> TrainingArgs {
        let mut extra = Map::new();
        extra.insert("batch_size".to_string(), Value::from(self.batch_size));
        extra.insert("train_fraction".to_string(), Value::from(self.train_fraction));
        extra.insert("seed".to_string(), Value::from(self.seed));
        extra.insert(
            "data_path".to_string(),
            Value::from(self.data_path.display().to_string()),
        );
        TrainingArgs {
            angles_definitions: self.angles_definitions.clone(),
            time_encoding:      self.time_encoding.clone(),
            decoder:            self.decoder.clone(),
            lr:                 self.lr,
            loss:               self.loss.clone(),
            l2_norm:            self.l2_norm,
            l1_norm:            self.l1_norm,
            circle_reg:         self.circle_reg,
            min_epochs:         self.epochs,
            lr_scheduler:       self.lr_scheduler.clone(),
            extra,
        }
    }
}

/// Everything a run needs, with the bundle files already written.
pub struct PreparedRun {
    pub trainer:       DiffusionTrainer,
    pub model_config:  DiffusionModelConfig,
    pub train_dataset: NoisedDataset,
    pub val_dataset:   NoisedDataset,
    pub loop_cfg:      LoopConfig,
    pub ckpt_manager:  CheckpointManager,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Steps 1-5: everything short of running the loop.
    pub fn prepare(&self) -> Result<PreparedRun> {
        let cfg = &self.config;

        // ── Step 1: Channel layout ────────────────────────────────────────────
        let ft_is_angular = ft_is_angular_for(&cfg.angles_definitions)?;
        let model_config = DiffusionModelConfig::new(cfg.bert_config(), ft_is_angular.clone())
            .with_time_encoding(cfg.time_encoding.parse::<TimeEncoding>()?)
            .with_decoder(cfg.decoder.parse::<DecoderHead>()?);

        // ── Step 2: Load samples ──────────────────────────────────────────────
        let samples = JsonlLoader::new(&cfg.data_path)
            .with_channels(ft_is_angular.len())
            .load_all()?;
        if samples.len() < 2 {
            anyhow::bail!(
                "need at least 2 samples to split train/validation, found {} in '{}'",
                samples.len(),
                cfg.data_path.display()
            );
        }

        // ── Step 3: Train / validation split ──────────────────────────────────
        let (train_samples, val_samples) = split_train_val(samples, cfg.train_fraction, Some(cfg.seed));
        tracing::info!(
            "Split: {} train, {} validation",
            train_samples.len(),
            val_samples.len()
        );
        let steps_per_epoch = train_samples.len().div_ceil(cfg.batch_size.max(1));

        // ── Step 4: Bundle files ──────────────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.out_dir);
        ckpt_manager.ensure_dir()?;
        let args = cfg.training_args();
        ckpt_manager
            .save_training_args(&args)
            .context("Cannot write training args")?;
        ckpt_manager
            .save_config(&model_config.bert)
            .context("Cannot write architecture config")?;

        // ── Step 5: Trainer ───────────────────────────────────────────────────
        let write_preds = cfg
            .write_valid_preds
            .then(|| cfg.out_dir.join("valid_preds"));
        let options = training_options_from_args(&args, cfg.ft_names.clone(), steps_per_epoch, write_preds)?;
        let trainer = DiffusionTrainer::new(&ft_is_angular, options)?;

        Ok(PreparedRun {
            trainer,
            model_config,
            train_dataset: NoisedDataset::new(train_samples),
            val_dataset:   NoisedDataset::new(val_samples),
            loop_cfg:      LoopConfig {
                batch_size:   cfg.batch_size,
                num_workers:  cfg.num_workers,
                shuffle_seed: cfg.seed,
            },
            ckpt_manager,
        })
    }

    pub fn execute(&self) -> Result<()> {
        let mut run = self.prepare()?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        run_training(
            &mut run.trainer,
            &run.model_config,
            run.train_dataset,
            run.val_dataset,
            &run.loop_cfg,
            &run.ckpt_manager,
        )?;
        Ok(())
    }
}
