// ============================================================
// Layer 4 — Noised Sample Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<NoisedSample>
// into tensors.
//
// Samples may have different lengths. Every sample is padded
// with zeros up to the longest one in the batch, and the padded
// residues get attn_mask = 0 so neither attention nor the loss
// ever sees them:
//
//   corrupted, known_noise  [N, L, C]
//   t                       [N, 1]
//   attn_mask               [N, L]
//   position_ids            [N, L]   only when every sample has them

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::NoisedSample;

// ─── NoisedBatch ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct NoisedBatch<B: Backend> {
    pub corrupted:    Tensor<B, 3>,
    pub t:            Tensor<B, 2>,
    pub known_noise:  Tensor<B, 3>,
    pub attn_mask:    Tensor<B, 2, Int>,
    pub position_ids: Option<Tensor<B, 2, Int>>,
}

impl<B: Backend> NoisedBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.corrupted.dims()[0]
    }
}

// ─── NoisedBatcher ────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct NoisedBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> NoisedBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Flatten rows into [seq_len * channels], zero-padding to `seq_len` rows.
fn flatten_padded(rows: &[Vec<f32>], seq_len: usize, channels: usize, out: &mut Vec<f32>) {
    for row in rows {
        out.extend(row.iter().copied());
    }
    out.extend(std::iter::repeat(0.0).take((seq_len - rows.len()) * channels));
}

impl<B: Backend> Batcher<NoisedSample, NoisedBatch<B>> for NoisedBatcher<B> {
    fn batch(&self, items: Vec<NoisedSample>) -> NoisedBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.iter().map(NoisedSample::seq_len).max().unwrap_or(0);
        let channels   = items.iter().map(NoisedSample::num_channels).max().unwrap_or(0);

        let mut corrupted   = Vec::with_capacity(batch_size * seq_len * channels);
        let mut known_noise = Vec::with_capacity(batch_size * seq_len * channels);
        let mut mask        = Vec::with_capacity(batch_size * seq_len);
        let mut positions   = Vec::with_capacity(batch_size * seq_len);
        let all_positioned  = items.iter().all(|s| s.position_ids.is_some());

        for sample in &items {
            flatten_padded(&sample.corrupted, seq_len, channels, &mut corrupted);
            flatten_padded(&sample.known_noise, seq_len, channels, &mut known_noise);

            let pad = seq_len - sample.attn_mask.len();
            mask.extend(sample.attn_mask.iter().map(|&m| i64::from(m != 0)));
            mask.extend(std::iter::repeat(0).take(pad));

            if let Some(ids) = &sample.position_ids {
                positions.extend(ids.iter().map(|&p| i64::from(p)));
                positions.extend(std::iter::repeat(0).take(pad));
            }
        }

        let t: Vec<f32> = items.iter().map(|s| s.t).collect();

        let corrupted = Tensor::<B, 3>::from_data(
            TensorData::new(corrupted, [batch_size, seq_len, channels]), &self.device,
        );
        let known_noise = Tensor::<B, 3>::from_data(
            TensorData::new(known_noise, [batch_size, seq_len, channels]), &self.device,
        );
        let attn_mask = Tensor::<B, 2, Int>::from_data(
            TensorData::new(mask, [batch_size, seq_len]), &self.device,
        );
        let t = Tensor::<B, 2>::from_data(TensorData::new(t, [batch_size, 1]), &self.device);

        let position_ids = all_positioned.then(|| {
            Tensor::<B, 2, Int>::from_data(
                TensorData::new(positions, [batch_size, seq_len]), &self.device,
            )
        });

        NoisedBatch { corrupted, t, known_noise, attn_mask, position_ids }
    }
}
