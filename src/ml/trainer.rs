// ============================================================
// Layer 5 — Training Controller & Loop
// ============================================================
// DiffusionTrainer owns everything about a run that is not a
// model weight: the per-channel loss composer, the penalty
// coefficients, the optimiser/schedule settings and the run's
// counters. The model itself is passed into every step, so the
// same trainer drives the autodiff model during training and
// model.valid() during validation.
//
// Per epoch:
//
//   training_step × N     forward → loss terms → mean (+ L1)
//                         → backward → AdamW step at scheduled lr
//   validation_step × M   on model.valid(), optional JSON dump
//   validation_epoch_end  mean validation loss
//   training_epoch_end    mean training loss, elapsed time,
//                         epoch counter += 1
//   metrics.csv row, best_by_train / best_by_valid checkpoints
//
// Backends:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on the inner backend (Wgpu)
//   - The validation batcher therefore uses B::InnerBackend

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    time::Instant,
};

use crate::data::{
    batcher::{NoisedBatch, NoisedBatcher},
    dataset::NoisedDataset,
};
use crate::domain::{
    angles::default_feature_names,
    error::DiffusionError,
    options::{BestBy, LossKind, LrSchedulerKind},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
    predictions::PredictionDump,
};
use crate::ml::{
    loss::LossComposer,
    model::{DiffusionModel, DiffusionModelConfig},
    schedule::LrSchedule,
    time_embed::normalize_timesteps,
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

// ─── Options ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOptions {
    /// One name per channel for metric keys; ft0, ft1, ... when unset.
    pub ft_names:           Option<Vec<String>>,
    pub lr:                 f64,
    pub loss:               LossKind,
    /// Coefficient of the L1 norm of all trainable parameters.
    pub l1:                 f64,
    /// AdamW weight decay.
    pub l2:                 f64,
    /// Penalty on angular predictions outside [-π, π].
    pub circle_reg:         f64,
    pub epochs:             usize,
    pub steps_per_epoch:    usize,
    pub lr_scheduler:       Option<LrSchedulerKind>,
    pub write_preds_to_dir: Option<PathBuf>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            ft_names:           None,
            lr:                 5e-5,
            loss:               LossKind::SmoothL1,
            l1:                 0.0,
            l2:                 0.0,
            circle_reg:         0.0,
            epochs:             1,
            steps_per_epoch:    250,
            lr_scheduler:       None,
            write_preds_to_dir: None,
        }
    }
}

/// Result of one training or validation step.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// Aggregate loss, [1]; carries the graph during training.
    pub loss:       Tensor<B, 1>,
    /// Per-channel losses, [C].
    pub loss_terms: Tensor<B, 1>,
    /// Named scalars emitted for this step.
    pub metrics:    BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch:        usize,
    /// NaN when the epoch had no steps.
    pub mean_loss:    f64,
    pub elapsed_secs: Option<f64>,
}

/// Optimiser plus the learning rate to feed it at each step.
pub struct OptimizerSetup<O> {
    pub optimizer: O,
    pub schedule:  Option<LrSchedule>,
    pub base_lr:   f64,
}

impl<O> OptimizerSetup<O> {
    pub fn lr_for(&self, epoch: usize, global_step: usize) -> f64 {
        scheduled_lr(self.schedule.as_ref(), self.base_lr, epoch, global_step)
    }
}

/// Constant `base_lr` unless a schedule is configured.
pub fn scheduled_lr(
    schedule:    Option<&LrSchedule>,
    base_lr:     f64,
    epoch:       usize,
    global_step: usize,
) -> f64 {
    schedule.map_or(base_lr, |s| s.lr_for(epoch, global_step))
}

// ─── L1 penalty ───────────────────────────────────────────────────────────────
struct L1Norm<'a, B: Backend> {
    exclude: &'a [ParamId],
    total:   Option<Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for L1Norm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if self.exclude.contains(&id) {
            return;
        }
        let norm = tensor.clone().abs().sum();
        self.total = Some(match self.total.take() {
            Some(total) => total + norm,
            None => norm,
        });
    }
}

/// Σ|θ| over every float parameter not listed in `exclude`, [1].
pub fn parameter_l1<B: Backend>(model: &DiffusionModel<B>, exclude: &[ParamId]) -> Option<Tensor<B, 1>> {
    let mut visitor = L1Norm { exclude, total: None };
    model.visit(&mut visitor);
    visitor.total
}

fn host_scalars<B: Backend>(t: Tensor<B, 1>) -> Result<Vec<f64>, DiffusionError> {
    t.into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| DiffusionError::ShapeMismatch(format!("unreadable loss tensor: {e:?}")))
}

fn mean_or_nan(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ─── DiffusionTrainer ─────────────────────────────────────────────────────────
#[derive(Debug)]
pub struct DiffusionTrainer {
    composer:              LossComposer,
    ft_names:              Vec<String>,
    options:               TrainingOptions,
    write_preds_counter:   usize,
    train_epoch_counter:   usize,
    train_epoch_last_time: Instant,
    train_losses:          Vec<f64>,
    valid_losses:          Vec<f64>,
}

impl DiffusionTrainer {
    pub fn new(ft_is_angular: &[bool], options: TrainingOptions) -> Result<Self, DiffusionError> {
        let ft_names = match &options.ft_names {
            Some(names) if names.len() != ft_is_angular.len() => {
                return Err(DiffusionError::Config(format!(
                    "got {} feature names for {} channels",
                    names.len(),
                    ft_is_angular.len()
                )));
            }
            Some(names) => names.clone(),
            None => default_feature_names(ft_is_angular.len()),
        };

        if let Some(dir) = &options.write_preds_to_dir {
            fs::create_dir_all(dir).map_err(|e| DiffusionError::io(dir, e))?;
            tracing::info!("Writing validation predictions to '{}'", dir.display());
        }

        let composer = LossComposer::new(options.loss, ft_is_angular, options.circle_reg);
        Ok(Self {
            composer,
            ft_names,
            options,
            write_preds_counter:   0,
            train_epoch_counter:   0,
            train_epoch_last_time: Instant::now(),
            train_losses:          Vec::new(),
            valid_losses:          Vec::new(),
        })
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    pub fn composer(&self) -> &LossComposer {
        &self.composer
    }

    pub fn ft_names(&self) -> &[String] {
        &self.ft_names
    }

    pub fn train_epoch_counter(&self) -> usize {
        self.train_epoch_counter
    }

    pub fn write_preds_counter(&self) -> usize {
        self.write_preds_counter
    }

    /// Forward one batch; returns the per-channel loss terms and the prediction.
    pub fn loss_terms<B: Backend>(
        &self,
        model: &DiffusionModel<B>,
        batch: &NoisedBatch<B>,
    ) -> Result<(Tensor<B, 1>, Tensor<B, 3>), DiffusionError> {
        let timestep = normalize_timesteps(batch.t.clone())?;
        let predicted = model.forward(
            batch.corrupted.clone(),
            timestep,
            batch.attn_mask.clone(),
            batch.position_ids.clone(),
        )?;
        let terms = self.composer.loss_terms(
            predicted.clone(),
            batch.known_noise.clone(),
            batch.attn_mask.clone(),
        )?;
        Ok((terms, predicted))
    }

    /// Name every term and the aggregate, and emit them as metric events.
    fn emit_metrics(&self, prefix: &str, terms: &[f64], loss: f64) -> BTreeMap<String, f64> {
        let mut metrics: BTreeMap<String, f64> = self
            .ft_names
            .iter()
            .zip(terms)
            .map(|(name, &value)| (format!("{prefix}_{name}"), value))
            .collect();
        metrics.insert(prefix.to_string(), loss);
        for (name, value) in &metrics {
            tracing::debug!(target: "metrics", metric = %name, value = *value);
        }
        metrics
    }

    pub fn training_step<B: Backend>(
        &mut self,
        model: &DiffusionModel<B>,
        batch: &NoisedBatch<B>,
    ) -> Result<StepOutput<B>, DiffusionError> {
        let (terms, _) = self.loss_terms(model, batch)?;
        let mut loss = terms.clone().mean();

        if self.options.l1 > 0.0 {
            if let Some(norm) = parameter_l1(model, &model.frozen_param_ids()) {
                loss = loss + norm.mul_scalar(self.options.l1);
            }
        }

        let term_values = host_scalars(terms.clone())?;
        let loss_value = host_scalars(loss.clone())?.first().copied().unwrap_or(f64::NAN);
        let metrics = self.emit_metrics("train_loss", &term_values, loss_value);
        self.train_losses.push(loss_value);

        Ok(StepOutput { loss, loss_terms: terms, metrics })
    }

    /// Callers pass the validation model (`model.valid()`), so no graph is built.
    pub fn validation_step<B: Backend>(
        &mut self,
        model: &DiffusionModel<B>,
        batch: &NoisedBatch<B>,
    ) -> Result<StepOutput<B>, DiffusionError> {
        let (terms, predicted) = self.loss_terms(model, batch)?;
        let loss = terms.clone().mean();

        if let Some(dir) = &self.options.write_preds_to_dir {
            PredictionDump::from_tensors(
                batch.known_noise.clone(),
                predicted,
                batch.attn_mask.clone(),
                terms.clone(),
            )?
            .write(dir, self.write_preds_counter)?;
        }
        self.write_preds_counter += 1;

        let term_values = host_scalars(terms.clone())?;
        let loss_value = host_scalars(loss.clone())?.first().copied().unwrap_or(f64::NAN);
        let metrics = self.emit_metrics("val_loss", &term_values, loss_value);
        self.valid_losses.push(loss_value);

        Ok(StepOutput { loss, loss_terms: terms, metrics })
    }

    pub fn validation_epoch_end(&mut self) -> EpochSummary {
        let mean_loss = mean_or_nan(&self.valid_losses);
        self.valid_losses.clear();
        tracing::info!(
            "Valid loss at epoch {} end: {:.4}",
            self.train_epoch_counter,
            mean_loss
        );
        EpochSummary { epoch: self.train_epoch_counter, mean_loss, elapsed_secs: None }
    }

    pub fn training_epoch_end(&mut self) -> EpochSummary {
        let mean_loss = mean_or_nan(&self.train_losses);
        self.train_losses.clear();
        let elapsed = self.train_epoch_last_time.elapsed().as_secs_f64();
        tracing::info!(
            "Train loss at epoch {} end: {:.4} ({:.2} seconds)",
            self.train_epoch_counter,
            mean_loss,
            elapsed
        );
        let summary = EpochSummary {
            epoch: self.train_epoch_counter,
            mean_loss,
            elapsed_secs: Some(elapsed),
        };
        self.train_epoch_counter += 1;
        self.train_epoch_last_time = Instant::now();
        summary
    }

    pub fn configure_optimizers<B: AutodiffBackend>(
        &self,
    ) -> OptimizerSetup<impl Optimizer<DiffusionModel<B>, B>> {
        tracing::info!(
            "Using AdamW with lr {} and weight decay {}",
            self.options.lr,
            self.options.l2
        );
        // AdamW: θ ← θ - lr · (m̂ / (√v̂ + ε) + λ·θ)
        let optimizer = AdamWConfig::new()
            .with_weight_decay(self.options.l2 as f32)
            .init::<B, DiffusionModel<B>>();

        let schedule = self.options.lr_scheduler.map(|kind| {
            let schedule = LrSchedule::new(
                kind,
                self.options.lr,
                self.options.epochs,
                self.options.steps_per_epoch,
            );
            tracing::info!(
                "Using {} schedule, stepped per {:?}",
                kind.as_str(),
                schedule.interval()
            );
            schedule
        });

        OptimizerSetup { optimizer, schedule, base_lr: self.options.lr }
    }
}

// ─── Epoch driver ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub batch_size:   usize,
    pub num_workers:  usize,
    pub shuffle_seed: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { batch_size: 64, num_workers: 1, shuffle_seed: 42 }
    }
}

pub fn run_training(
    trainer:       &mut DiffusionTrainer,
    model_config:  &DiffusionModelConfig,
    train_dataset: NoisedDataset,
    val_dataset:   NoisedDataset,
    loop_cfg:      &LoopConfig,
    ckpt_manager:  &CheckpointManager,
) -> Result<()> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    let model: DiffusionModel<MyBackend> = model_config.init(&device)?;
    train_loop(trainer, model, train_dataset, val_dataset, loop_cfg, ckpt_manager, &device)?;
    Ok(())
}

/// Run `trainer.options().epochs` epochs and return the trained model.
pub fn train_loop<B: AutodiffBackend>(
    trainer:       &mut DiffusionTrainer,
    mut model:     DiffusionModel<B>,
    train_dataset: NoisedDataset,
    val_dataset:   NoisedDataset,
    loop_cfg:      &LoopConfig,
    ckpt_manager:  &CheckpointManager,
    device:        &B::Device,
) -> Result<DiffusionModel<B>> {
    let epochs = trainer.options().epochs;
    tracing::info!(
        "Training for {} epochs on {} samples, validating on {}",
        epochs,
        train_dataset.sample_count(),
        val_dataset.sample_count()
    );

    let OptimizerSetup { optimizer: mut optim, schedule, base_lr } =
        trainer.configure_optimizers::<B>();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_loader = DataLoaderBuilder::new(NoisedBatcher::<B>::new(device.clone()))
        .batch_size(loop_cfg.batch_size)
        .shuffle(loop_cfg.shuffle_seed)
        .num_workers(loop_cfg.num_workers)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend — no autodiff overhead) ──────────
    let val_loader = DataLoaderBuilder::new(NoisedBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(loop_cfg.batch_size)
        .num_workers(loop_cfg.num_workers)
        .build(val_dataset);

    let metrics = MetricsLogger::new(ckpt_manager.dir())?;
    let mut best_train = f64::INFINITY;
    let mut best_valid = f64::INFINITY;
    let mut global_step = 0usize;
    let mut lr = base_lr;

    for epoch in 0..epochs {
        // ── Training phase ────────────────────────────────────────────────────
        for batch in train_loader.iter() {
            lr = scheduled_lr(schedule.as_ref(), base_lr, epoch, global_step);
            let output = trainer
                .training_step(&model, &batch)
                .with_context(|| format!("training step {global_step}"))?;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);
            global_step += 1;
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        for batch in val_loader.iter() {
            trainer
                .validation_step(&model_valid, &batch)
                .with_context(|| format!("validation at epoch {epoch}"))?;
        }

        let valid = trainer.validation_epoch_end();
        let train = trainer.training_epoch_end();

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | lr={:.2e}",
            epoch + 1, epochs, train.mean_loss, valid.mean_loss, lr,
        );
        let row = EpochMetrics::new(
            epoch,
            train.mean_loss,
            valid.mean_loss,
            lr,
            train.elapsed_secs.unwrap_or_default(),
        );
        metrics.log(&row)?;

        if train.mean_loss < best_train {
            best_train = train.mean_loss;
            ckpt_manager.save_best(&model, BestBy::Train, epoch, global_step)?;
        }
        if row.is_improvement(best_valid) {
            best_valid = valid.mean_loss;
            ckpt_manager.save_best(&model, BestBy::Valid, epoch, global_step)?;
            tracing::info!("New best validation loss {:.4} at epoch {}", best_valid, epoch);
        }
    }

    tracing::info!("Training complete after {} steps", global_step);
    Ok(model)
}
