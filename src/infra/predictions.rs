// ============================================================
// Layer 6 — Validation Prediction Dumps
// ============================================================
// When a predictions directory is configured, every validation
// step writes one JSON file, numbered by a counter the trainer
// owns:
//
//   <dir>/0_preds.json, 1_preds.json, ...
//
//   {"known_noise":     [B][L][C],
//    "predicted_noise": [B][L][C],
//    "attn_mask":       [B][L],
//    "losses":          [C]}
//
// Writes are synchronous and never retried; a failure aborts
// the validation step.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::error::DiffusionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDump {
    pub known_noise:     Vec<Vec<Vec<f32>>>,
    pub predicted_noise: Vec<Vec<Vec<f32>>>,
    pub attn_mask:       Vec<Vec<i64>>,
    pub losses:          Vec<f32>,
}

pub fn preds_filename(counter: usize) -> String {
    format!("{counter}_preds.json")
}

fn host_values<B: Backend, const D: usize, K>(t: Tensor<B, D, K>) -> Result<Vec<f32>, DiffusionError>
where
    K: burn::tensor::BasicOps<B>,
{
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DiffusionError::ShapeMismatch(format!("unreadable tensor: {e:?}")))
}

fn nest3(flat: Vec<f32>, [_, seq_len, channels]: [usize; 3]) -> Vec<Vec<Vec<f32>>> {
    if seq_len == 0 || channels == 0 {
        return Vec::new();
    }
    flat.chunks(seq_len * channels)
        .map(|seq| seq.chunks(channels).map(<[f32]>::to_vec).collect())
        .collect()
}

impl PredictionDump {
    pub fn from_tensors<B: Backend>(
        known:     Tensor<B, 3>,
        predicted: Tensor<B, 3>,
        attn_mask: Tensor<B, 2, Int>,
        losses:    Tensor<B, 1>,
    ) -> Result<Self, DiffusionError> {
        let dims = known.dims();
        let [_, seq_len] = attn_mask.dims();
        let mask = host_values(attn_mask)?;
        Ok(Self {
            known_noise:     nest3(host_values(known)?, dims),
            predicted_noise: nest3(host_values(predicted)?, dims),
            attn_mask:       mask.chunks(seq_len.max(1))
                .map(|row| row.iter().map(|&m| m as i64).collect())
                .collect(),
            losses:          host_values(losses)?,
        })
    }

    /// Write as `<dir>/<counter>_preds.json`.
    pub fn write(&self, dir: &Path, counter: usize) -> Result<PathBuf, DiffusionError> {
        let path = dir.join(preds_filename(counter));
        let json = serde_json::to_string(self).map_err(|e| DiffusionError::json(&path, e))?;
        fs::write(&path, json).map_err(|e| DiffusionError::io(&path, e))?;
        tracing::debug!("Wrote validation predictions to '{}'", path.display());
        Ok(path)
    }
}
