// ============================================================
// Layer 5 — Rebuilding a Model From a Bundle
// ============================================================
// from_dir() reverses what a training run writes:
//
//   training_args.json ─┬─ angles_definitions → ft_is_angular
//                       ├─ time_encoding, decoder → model heads
//                       └─ lr, loss, l1/l2, circle_reg,
//                          min_epochs, lr_scheduler → trainer
//   config.json ──────── BertConfig
//   models/best_by_<x>/  checkpoints, ordered by epoch, picked
//                        by index (negative = from the end)
//
// Optionally copies the minimal file set (both JSON files and
// the selected checkpoint) somewhere else, e.g. to ship a model.

use burn::prelude::*;
use std::path::{Path, PathBuf};

use crate::domain::{
    angles::ft_is_angular_for,
    error::DiffusionError,
    options::{BestBy, DecoderHead, LossKind, LrSchedulerKind, TimeEncoding},
};
use crate::infra::checkpoint::{CheckpointManager, TrainingArgs};
use crate::ml::{
    model::{DiffusionModel, DiffusionModelConfig},
    trainer::{DiffusionTrainer, TrainingOptions},
};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Overrides the flags implied by `angles_definitions`.
    pub ft_is_angular:      Option<Vec<bool>>,
    pub ft_names:           Option<Vec<String>>,
    pub load_weights:       bool,
    /// Checkpoint index after sorting by epoch; -1 is the latest.
    pub idx:                isize,
    pub best_by:            BestBy,
    pub copy_to:            Option<PathBuf>,
    pub write_preds_to_dir: Option<PathBuf>,
    pub steps_per_epoch:    usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ft_is_angular:      None,
            ft_names:           None,
            load_weights:       true,
            idx:                -1,
            best_by:            BestBy::Valid,
            copy_to:            None,
            write_preds_to_dir: None,
            steps_per_epoch:    250,
        }
    }
}

pub struct Restored<B: Backend> {
    pub model:         DiffusionModel<B>,
    pub trainer:       DiffusionTrainer,
    pub model_config:  DiffusionModelConfig,
    pub training_args: TrainingArgs,
    /// The checkpoint whose weights were loaded, if any.
    pub checkpoint:    Option<PathBuf>,
}

/// Trainer settings recorded in training_args.json.
pub fn training_options_from_args(
    args:               &TrainingArgs,
    ft_names:           Option<Vec<String>>,
    steps_per_epoch:    usize,
    write_preds_to_dir: Option<PathBuf>,
) -> Result<TrainingOptions, DiffusionError> {
    Ok(TrainingOptions {
        ft_names,
        lr:           args.lr,
        loss:         LossKind::resolve(&args.loss)?,
        l1:           args.l1_norm,
        l2:           args.l2_norm,
        circle_reg:   args.circle_reg,
        epochs:       args.min_epochs,
        steps_per_epoch,
        lr_scheduler: LrSchedulerKind::parse_optional(args.lr_scheduler.as_deref())?,
        write_preds_to_dir,
    })
}

pub fn from_dir<B: Backend>(
    dir:    &Path,
    opts:   LoadOptions,
    device: &B::Device,
) -> Result<Restored<B>, DiffusionError> {
    let manager = CheckpointManager::new(dir);
    let training_args = manager.load_training_args()?;
    let bert = manager.load_config()?;

    let ft_is_angular = match opts.ft_is_angular {
        Some(flags) => flags,
        None => {
            let flags = ft_is_angular_for(&training_args.angles_definitions)?;
            tracing::info!(
                "Auto constructed ft_is_angular for {}: {:?}",
                training_args.angles_definitions,
                flags
            );
            flags
        }
    };

    let model_config = DiffusionModelConfig::new(bert, ft_is_angular.clone())
        .with_time_encoding(training_args.time_encoding.parse::<TimeEncoding>()?)
        .with_decoder(training_args.decoder.parse::<DecoderHead>()?);
    let options = training_options_from_args(
        &training_args,
        opts.ft_names,
        opts.steps_per_epoch,
        opts.write_preds_to_dir,
    )?;

    let mut model = model_config.init::<B>(device)?;
    let trainer = DiffusionTrainer::new(&ft_is_angular, options)?;

    let checkpoint = if opts.load_weights {
        let path = manager.select_checkpoint(opts.best_by, opts.idx)?;
        tracing::info!("Found {} checkpoint, loading '{}'", opts.best_by, path.display());
        model = manager.load_weights(model, &path, device)?;
        Some(path)
    } else {
        None
    };

    if let Some(dest) = &opts.copy_to {
        tracing::info!("Copying minimal model file set to '{}'", dest.display());
        manager.copy_minimal(dest, checkpoint.as_deref().map(|p| (opts.best_by, p)))?;
    }

    Ok(Restored { model, trainer, model_config, training_args, checkpoint })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::{CONFIG_FILE, TRAINING_ARGS_FILE};
    use crate::ml::model::BertConfig;
    use burn::backend::NdArray;
    use serde_json::{Map, Value};

    type TestBackend = NdArray<f32>;

    fn bert() -> BertConfig {
        BertConfig::new()
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .with_max_position_embeddings(16)
    }

    fn args(angles: &str, decoder: &str, loss: &str) -> TrainingArgs {
        let mut extra = Map::new();
        extra.insert("batch_size".to_string(), Value::from(32));
        TrainingArgs {
            angles_definitions: angles.to_string(),
            time_encoding:      "sinusoidal".to_string(),
            decoder:            decoder.to_string(),
            lr:                 1e-4,
            loss:               loss.to_string(),
            l2_norm:            0.01,
            l1_norm:            0.0,
            circle_reg:         0.1,
            min_epochs:         5,
            lr_scheduler:       Some("OneCycleLR".to_string()),
            extra,
        }
    }

    /// A bundle with checkpoints at epochs 1, 3 and 10 in best_by_valid.
    fn write_bundle(dir: &Path, args: &TrainingArgs) -> DiffusionModel<TestBackend> {
        let manager = CheckpointManager::new(dir);
        manager.ensure_dir().unwrap();
        manager.save_training_args(args).unwrap();
        manager.save_config(&bert()).unwrap();

        let flags = ft_is_angular_for(&args.angles_definitions).unwrap();
        let config = DiffusionModelConfig::new(bert(), flags)
            .with_time_encoding(TimeEncoding::Sinusoidal)
            .with_decoder(args.decoder.parse().unwrap());
        let device = Default::default();
        let mut latest = None;
        for epoch in [3, 10, 1] {
            let model = config.init::<TestBackend>(&device).unwrap();
            manager.write_checkpoint(&model, BestBy::Valid, epoch, epoch * 4).unwrap();
            if epoch == 10 {
                latest = Some(model);
            }
        }
        latest.unwrap()
    }

    fn forward(model: &DiffusionModel<TestBackend>, channels: usize) -> Tensor<TestBackend, 3> {
        let device = Default::default();
        model
            .forward(
                Tensor::ones([1, 3, channels], &device),
                Tensor::from_floats([17.0], &device),
                Tensor::ones([1, 3], &device),
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_from_dir_loads_latest_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let expected = write_bundle(tmp.path(), &args("canonical-minimal-angles", "linear", "smooth_l1"));

        let restored = from_dir::<TestBackend>(tmp.path(), LoadOptions::default(), &Default::default()).unwrap();
        assert_eq!(
            restored.checkpoint.as_ref().unwrap().file_name().unwrap(),
            "epoch=10-step=40.ckpt"
        );
        assert_eq!(restored.model.n_inputs(), 4);
        assert_eq!(restored.model.decoder_head(), DecoderHead::Linear);
        assert_eq!(restored.model.time_encoding(), TimeEncoding::Sinusoidal);

        let diff: f32 = (forward(&restored.model, 4) - forward(&expected, 4))
            .abs()
            .max()
            .into_scalar()
            .elem();
        assert!(diff < 1e-6);

        let options = restored.trainer.options();
        assert_eq!(options.epochs, 5);
        assert_eq!(options.lr_scheduler, Some(LrSchedulerKind::OneCycle));
        assert_eq!(options.l2, 0.01);
        assert!(restored.trainer.composer().channel_losses().iter().all(|l| l.is_angular()));
    }

    #[test]
    fn test_index_selection_and_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path(), &args("canonical-minimal-angles", "mlp", "l1"));
        let device = Default::default();

        let first = from_dir::<TestBackend>(tmp.path(), LoadOptions { idx: 0, ..LoadOptions::default() }, &device)
            .unwrap();
        assert_eq!(first.checkpoint.unwrap().file_name().unwrap(), "epoch=1-step=4.ckpt");

        let out_of_range = from_dir::<TestBackend>(tmp.path(), LoadOptions { idx: 3, ..LoadOptions::default() }, &device);
        assert!(matches!(out_of_range, Err(DiffusionError::Checkpoint(_))));

        let no_train = from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions { best_by: BestBy::Train, ..LoadOptions::default() },
            &device,
        );
        assert!(matches!(no_train, Err(DiffusionError::Checkpoint(_))));
    }

    #[test]
    fn test_fresh_model_without_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save_training_args(&args("cart-coords", "mlp", "radian_l1_smooth")).unwrap();
        manager.save_config(&bert()).unwrap();

        let restored = from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions { load_weights: false, ..LoadOptions::default() },
            &Default::default(),
        )
        .unwrap();
        assert!(restored.checkpoint.is_none());
        assert_eq!(restored.model.n_inputs(), 3);
        assert_eq!(restored.trainer.options().loss, LossKind::SmoothL1);
        assert!(restored.trainer.composer().channel_losses().iter().all(|l| !l.is_angular()));
    }

    #[test]
    fn test_explicit_flags_override_definition() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save_training_args(&args("no-such-scheme", "mlp", "l1")).unwrap();
        manager.save_config(&bert()).unwrap();
        let device = Default::default();

        let unknown = from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions { load_weights: false, ..LoadOptions::default() },
            &device,
        );
        assert!(matches!(unknown, Err(DiffusionError::Config(_))));

        let restored = from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions {
                load_weights: false,
                ft_is_angular: Some(vec![true, false]),
                ..LoadOptions::default()
            },
            &device,
        )
        .unwrap();
        assert_eq!(restored.model.n_inputs(), 2);
    }

    #[test]
    fn test_checkpoint_with_other_channel_count_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path(), &args("canonical-minimal-angles", "mlp", "l1"));

        let result = from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions { ft_is_angular: Some(vec![true, false]), ..LoadOptions::default() },
            &Default::default(),
        );
        assert!(matches!(result, Err(DiffusionError::Checkpoint(_))));
    }

    #[test]
    fn test_unknown_names_in_args_are_config_errors() {
        let device = Default::default();
        for (decoder, time, scheduler) in [
            ("conv", "sinusoidal", "OneCycleLR"),
            ("mlp", "learned", "OneCycleLR"),
            ("mlp", "sinusoidal", "CosineAnnealing"),
        ] {
            let tmp = tempfile::tempdir().unwrap();
            let manager = CheckpointManager::new(tmp.path());
            let mut a = args("canonical", decoder, "l1");
            a.time_encoding = time.to_string();
            a.lr_scheduler = Some(scheduler.to_string());
            manager.save_training_args(&a).unwrap();
            manager.save_config(&bert()).unwrap();

            let result = from_dir::<TestBackend>(
                tmp.path(),
                LoadOptions { load_weights: false, ..LoadOptions::default() },
                &device,
            );
            assert!(matches!(result, Err(DiffusionError::Config(_))), "{decoder}/{time}/{scheduler}");
        }
    }

    #[test]
    fn test_copy_to_writes_minimal_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let source_args = args("canonical-minimal-angles", "mlp", "smooth_l1");
        write_bundle(tmp.path(), &source_args);

        from_dir::<TestBackend>(
            tmp.path(),
            LoadOptions { copy_to: Some(dest.path().to_path_buf()), ..LoadOptions::default() },
            &Default::default(),
        )
        .unwrap();

        assert!(dest.path().join(TRAINING_ARGS_FILE).is_file());
        assert!(dest.path().join(CONFIG_FILE).is_file());
        let copied = CheckpointManager::new(dest.path());
        let checkpoints = copied.list_checkpoints(BestBy::Valid).unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].file_name().unwrap(), "epoch=10-step=40.ckpt");
        assert_eq!(copied.load_training_args().unwrap(), source_args);

        // The copy restores on its own.
        let again = from_dir::<TestBackend>(dest.path(), LoadOptions::default(), &Default::default()).unwrap();
        assert_eq!(again.model.n_inputs(), 4);
    }
}
