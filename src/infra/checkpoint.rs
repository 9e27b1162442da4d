// ============================================================
// Layer 6 — Bundle & Checkpoint Manager
// ============================================================
// A trained model lives in a bundle directory:
//
//   <dir>/
//     training_args.json          ← how the run was configured
//     config.json                 ← BertConfig (architecture)
//     metrics.csv                 ← one row per epoch
//     models/
//       best_by_train/
//         epoch=7-step=560.ckpt   ← lowest training loss so far
//       best_by_valid/
//         epoch=5-step=400.ckpt   ← lowest validation loss so far
//
// Checkpoints are Burn named-MessagePack records at full precision.
// They go through the bytes recorder and plain fs calls so the file
// keeps its `.ckpt` name (file recorders force their own extension).
//
// Checkpoints are ordered by the epoch embedded in the file name,
// never lexically: epoch=10 sorts after epoch=3.

use burn::{
    config::Config,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{error::DiffusionError, options::BestBy};
use crate::ml::model::{BertConfig, DiffusionModel};

pub const TRAINING_ARGS_FILE: &str = "training_args.json";
pub const CONFIG_FILE: &str = "config.json";
pub const MODELS_DIR: &str = "models";
pub const CHECKPOINT_EXT: &str = "ckpt";

type CheckpointRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

// ─── TrainingArgs ─────────────────────────────────────────────────────────────
/// Contents of training_args.json.
///
/// Option names are kept as strings here and resolved when a model
/// is rebuilt, so an unknown name surfaces as a configuration error
/// rather than a JSON error. Keys this crate does not use are kept
/// in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArgs {
    pub angles_definitions: String,
    pub time_encoding:      String,
    pub decoder:            String,
    pub lr:                 f64,
    pub loss:               String,
    pub l2_norm:            f64,
    pub l1_norm:            f64,
    pub circle_reg:         f64,
    pub min_epochs:         usize,
    #[serde(default)]
    pub lr_scheduler:       Option<String>,
    #[serde(flatten)]
    pub extra:              Map<String, Value>,
}

// ─── Checkpoint names ─────────────────────────────────────────────────────────
pub fn checkpoint_filename(epoch: usize, step: usize) -> String {
    format!("epoch={epoch}-step={step}.{CHECKPOINT_EXT}")
}

/// Epoch number from a `epoch=<N>-step=<S>.ckpt` file name.
pub fn epoch_from_filename(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    stem.split('-')
        .find_map(|part| part.strip_prefix("epoch="))
        .and_then(|n| n.parse().ok())
}

/// Map a possibly negative index onto `0..len`; negative counts from the end.
pub fn resolve_index(len: usize, idx: isize) -> Option<usize> {
    let resolved = if idx < 0 { len as isize + idx } else { idx };
    (0..len as isize).contains(&resolved).then_some(resolved as usize)
}

// ─── CheckpointManager ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the bundle directory (like `mkdir -p`).
    pub fn ensure_dir(&self) -> Result<(), DiffusionError> {
        fs::create_dir_all(&self.dir).map_err(|e| DiffusionError::io(&self.dir, e))
    }

    pub fn checkpoint_dir(&self, best_by: BestBy) -> PathBuf {
        self.dir.join(MODELS_DIR).join(best_by.subfolder())
    }

    // ── training_args.json ────────────────────────────────────────────────────
    pub fn save_training_args(&self, args: &TrainingArgs) -> Result<(), DiffusionError> {
        let path = self.dir.join(TRAINING_ARGS_FILE);
        let json = serde_json::to_string_pretty(args).map_err(|e| DiffusionError::json(&path, e))?;
        fs::write(&path, json).map_err(|e| DiffusionError::io(&path, e))?;
        tracing::debug!("Saved training args to '{}'", path.display());
        Ok(())
    }

    pub fn load_training_args(&self) -> Result<TrainingArgs, DiffusionError> {
        let path = self.dir.join(TRAINING_ARGS_FILE);
        let json = fs::read_to_string(&path).map_err(|e| DiffusionError::io(&path, e))?;
        serde_json::from_str(&json).map_err(|e| DiffusionError::json(&path, e))
    }

    // ── config.json ───────────────────────────────────────────────────────────
    pub fn save_config(&self, config: &BertConfig) -> Result<(), DiffusionError> {
        let path = self.dir.join(CONFIG_FILE);
        config.save(&path).map_err(|e| DiffusionError::io(&path, e))?;
        tracing::debug!("Saved architecture config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<BertConfig, DiffusionError> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).map_err(|e| DiffusionError::io(&path, e))?;
        serde_json::from_str(&json).map_err(|e| DiffusionError::json(&path, e))
    }

    // ── checkpoints ───────────────────────────────────────────────────────────
    /// All checkpoints in one subfolder, ascending by epoch.
    pub fn list_checkpoints(&self, best_by: BestBy) -> Result<Vec<PathBuf>, DiffusionError> {
        let subdir = self.checkpoint_dir(best_by);
        if !subdir.is_dir() {
            return Err(DiffusionError::Checkpoint(format!(
                "no checkpoint folder '{}' (only the best_by_* layout is supported)",
                subdir.display()
            )));
        }
        let entries = fs::read_dir(&subdir).map_err(|e| DiffusionError::io(&subdir, e))?;

        let mut found = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| DiffusionError::io(&subdir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXT) {
                continue;
            }
            let epoch = epoch_from_filename(&path).ok_or_else(|| {
                DiffusionError::Checkpoint(format!("no epoch in checkpoint name '{}'", path.display()))
            })?;
            found.push((epoch, path));
        }
        found.sort_by_key(|(epoch, _)| *epoch);
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    pub fn select_checkpoint(&self, best_by: BestBy, idx: isize) -> Result<PathBuf, DiffusionError> {
        let mut checkpoints = self.list_checkpoints(best_by)?;
        if checkpoints.is_empty() {
            return Err(DiffusionError::Checkpoint(format!(
                "no checkpoints in '{}'",
                self.checkpoint_dir(best_by).display()
            )));
        }
        let i = resolve_index(checkpoints.len(), idx).ok_or_else(|| {
            DiffusionError::Checkpoint(format!(
                "index {idx} out of range for {} checkpoints",
                checkpoints.len()
            ))
        })?;
        Ok(checkpoints.swap_remove(i))
    }

    /// Write `model` as the only checkpoint in its subfolder.
    pub fn save_best<B: Backend>(
        &self,
        model:   &DiffusionModel<B>,
        best_by: BestBy,
        epoch:   usize,
        step:    usize,
    ) -> Result<PathBuf, DiffusionError> {
        let subdir = self.checkpoint_dir(best_by);
        if subdir.is_dir() {
            for stale in self.list_checkpoints(best_by)? {
                fs::remove_file(&stale).map_err(|e| DiffusionError::io(&stale, e))?;
            }
        }
        self.write_checkpoint(model, best_by, epoch, step)
    }

    /// Write `model` as `epoch=<N>-step=<S>.ckpt`, next to any existing checkpoints.
    pub fn write_checkpoint<B: Backend>(
        &self,
        model:   &DiffusionModel<B>,
        best_by: BestBy,
        epoch:   usize,
        step:    usize,
    ) -> Result<PathBuf, DiffusionError> {
        let subdir = self.checkpoint_dir(best_by);
        fs::create_dir_all(&subdir).map_err(|e| DiffusionError::io(&subdir, e))?;

        let path = subdir.join(checkpoint_filename(epoch, step));
        let bytes = CheckpointRecorder::default()
            .record(model.clone().into_record(), ())
            .map_err(|e| DiffusionError::Checkpoint(format!("cannot encode weights: {e:?}")))?;
        fs::write(&path, bytes).map_err(|e| DiffusionError::io(&path, e))?;

        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Restore weights from `path` into a model of the same architecture.
    pub fn load_weights<B: Backend>(
        &self,
        model:  DiffusionModel<B>,
        path:   &Path,
        device: &B::Device,
    ) -> Result<DiffusionModel<B>, DiffusionError> {
        let bytes = fs::read(path).map_err(|e| DiffusionError::io(path, e))?;
        let record = CheckpointRecorder::default()
            .load(bytes, device)
            .map_err(|e| {
                DiffusionError::Checkpoint(format!("cannot decode '{}': {e:?}", path.display()))
            })?;
        let model = model.load_record(record);
        model.check_weight_shapes().map_err(|e| {
            DiffusionError::Checkpoint(format!("'{}' does not fit the model: {e}", path.display()))
        })?;
        tracing::info!("Loaded weights from '{}'", path.display());
        Ok(model)
    }

    /// Copy the files needed to rebuild a model into `dest`: the two JSON
    /// files, plus the selected checkpoint under the same subfolder name.
    pub fn copy_minimal(
        &self,
        dest:       &Path,
        checkpoint: Option<(BestBy, &Path)>,
    ) -> Result<(), DiffusionError> {
        fs::create_dir_all(dest).map_err(|e| DiffusionError::io(dest, e))?;
        for name in [TRAINING_ARGS_FILE, CONFIG_FILE] {
            let from = self.dir.join(name);
            fs::copy(&from, dest.join(name)).map_err(|e| DiffusionError::io(&from, e))?;
        }

        if let Some((best_by, ckpt)) = checkpoint {
            let subdir = dest.join(MODELS_DIR).join(best_by.subfolder());
            fs::create_dir_all(&subdir).map_err(|e| DiffusionError::io(&subdir, e))?;
            let name = ckpt.file_name().ok_or_else(|| {
                DiffusionError::Checkpoint(format!("not a checkpoint file: '{}'", ckpt.display()))
            })?;
            fs::copy(ckpt, subdir.join(name)).map_err(|e| DiffusionError::io(ckpt, e))?;
        }

        tracing::info!("Copied minimal bundle to '{}'", dest.display());
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), b"").unwrap();
    }

    fn sample_args() -> TrainingArgs {
        TrainingArgs {
            angles_definitions: "canonical-full-angles".to_string(),
            time_encoding:      "gaussian_fourier".to_string(),
            decoder:            "mlp".to_string(),
            lr:                 5e-5,
            loss:               "smooth_l1".to_string(),
            l2_norm:            0.0,
            l1_norm:            0.0,
            circle_reg:         0.0,
            min_epochs:         3,
            lr_scheduler:       Some("LinearWarmup".to_string()),
            extra:              Map::new(),
        }
    }

    #[test]
    fn test_epoch_parsing() {
        assert_eq!(epoch_from_filename(Path::new("epoch=10-step=440.ckpt")), Some(10));
        assert_eq!(epoch_from_filename(Path::new("/a/b/epoch=3.ckpt")), Some(3));
        assert_eq!(epoch_from_filename(Path::new("last.ckpt")), None);
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(3, 0), Some(0));
        assert_eq!(resolve_index(3, -1), Some(2));
        assert_eq!(resolve_index(3, -3), Some(0));
        assert_eq!(resolve_index(3, -4), None);
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(0, -1), None);
    }

    #[test]
    fn test_checkpoints_sorted_by_epoch_not_name() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        let subdir = manager.checkpoint_dir(BestBy::Valid);
        for name in ["epoch=10.ckpt", "epoch=3.ckpt", "epoch=1.ckpt", "notes.txt"] {
            touch(&subdir, name);
        }

        let names: Vec<String> = manager
            .list_checkpoints(BestBy::Valid)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["epoch=1.ckpt", "epoch=3.ckpt", "epoch=10.ckpt"]);

        let last = manager.select_checkpoint(BestBy::Valid, -1).unwrap();
        assert_eq!(last.file_name().unwrap(), "epoch=10.ckpt");
        let first = manager.select_checkpoint(BestBy::Valid, 0).unwrap();
        assert_eq!(first.file_name().unwrap(), "epoch=1.ckpt");
    }

    #[test]
    fn test_empty_or_out_of_range_selection() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        fs::create_dir_all(manager.checkpoint_dir(BestBy::Train)).unwrap();
        assert!(matches!(
            manager.select_checkpoint(BestBy::Train, -1),
            Err(DiffusionError::Checkpoint(_))
        ));

        touch(&manager.checkpoint_dir(BestBy::Train), "epoch=2-step=8.ckpt");
        assert!(matches!(
            manager.select_checkpoint(BestBy::Train, 1),
            Err(DiffusionError::Checkpoint(_))
        ));
        // Missing subfolder entirely
        assert!(matches!(
            manager.select_checkpoint(BestBy::Valid, -1),
            Err(DiffusionError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_training_args_keep_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        let mut args = sample_args();
        args.extra.insert("batch_size".to_string(), Value::from(64));
        args.extra.insert("timesteps".to_string(), Value::from(1000));
        manager.save_training_args(&args).unwrap();

        let loaded = manager.load_training_args().unwrap();
        assert_eq!(loaded, args);
        assert_eq!(loaded.extra["batch_size"], Value::from(64));
    }

    #[test]
    fn test_save_best_keeps_one_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let manager = CheckpointManager::new(tmp.path());
        let config = crate::ml::model::DiffusionModelConfig::new(
            BertConfig::new()
                .with_hidden_size(8)
                .with_num_hidden_layers(1)
                .with_num_attention_heads(2)
                .with_intermediate_size(16)
                .with_max_position_embeddings(16),
            vec![true, false],
        );
        let model = config.init::<TestBackend>(&device).unwrap();

        manager.save_best(&model, BestBy::Train, 1, 4).unwrap();
        let path = manager.save_best(&model, BestBy::Train, 2, 8).unwrap();
        assert_eq!(manager.list_checkpoints(BestBy::Train).unwrap(), vec![path.clone()]);
        assert_eq!(path.file_name().unwrap(), "epoch=2-step=8.ckpt");

        let fresh = config.init::<TestBackend>(&device).unwrap();
        let restored = manager.load_weights(fresh, &path, &device).unwrap();
        let x = Tensor::<TestBackend, 3>::ones([1, 3, 2], &device);
        let t = Tensor::<TestBackend, 1>::from_floats([5.0], &device);
        let mask = Tensor::<TestBackend, 2, Int>::ones([1, 3], &device);
        let a = model.forward(x.clone(), t.clone(), mask.clone(), None).unwrap();
        let b = restored.forward(x, t, mask, None).unwrap();
        let diff: f32 = (a - b).abs().max().into_scalar().elem();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_corrupt_checkpoint_is_checkpoint_error() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let manager = CheckpointManager::new(tmp.path());
        let path = tmp.path().join("epoch=1.ckpt");
        fs::write(&path, b"definitely not msgpack").unwrap();
        let model = crate::ml::model::DiffusionModelConfig::new(
            BertConfig::new()
                .with_hidden_size(8)
                .with_num_hidden_layers(1)
                .with_num_attention_heads(2)
                .with_intermediate_size(16),
            vec![true],
        )
        .init::<TestBackend>(&device)
        .unwrap();
        assert!(matches!(
            manager.load_weights(model, &path, &device),
            Err(DiffusionError::Checkpoint(_))
        ));
    }
}
