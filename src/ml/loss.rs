// ============================================================
// Layer 5 — Per-Channel Loss Composition
// ============================================================
// Every output channel gets its own loss strategy, chosen once
// when the composer is built:
//
//   channel is angular?   loss = l1          loss = smooth_l1
//   ───────────────────   ─────────────────  ──────────────────────────
//   no                    mean |p - k|       Huber(p - k, β = 1)
//   yes                   mean |wrap(k - p)| Huber(wrap(k - p), β = π/10)
//                                            + λ · mean(relu(|p| - π))
//
// wrap() folds a difference into [-π, π), so 0.1 and 0.1 + 2π
// are the same angle. Only the angular smooth-L1 strategy takes
// the circle penalty λ.
//
// Losses only ever see residues the attention mask marks valid:
// the (batch, position) coordinates of the mask's ones are
// gathered first, then each channel is reduced over them.

use burn::prelude::*;
use std::f64::consts::{PI, TAU};

use crate::domain::{error::DiffusionError, options::LossKind};

/// Huber transition point for wrapped angular differences.
pub const ANGULAR_SMOOTH_L1_BETA: f64 = PI / 10.0;
/// Huber transition point for plain regression channels.
pub const LINEAR_SMOOTH_L1_BETA: f64 = 1.0;

// ─── ChannelLoss ──────────────────────────────────────────────────────────────
/// Loss strategy for one feature channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLoss {
    L1,
    SmoothL1,
    RadianL1,
    RadianSmoothL1,
}

impl ChannelLoss {
    pub fn select(kind: LossKind, is_angular: bool) -> Self {
        match (kind, is_angular) {
            (LossKind::L1, false) => ChannelLoss::L1,
            (LossKind::SmoothL1, false) => ChannelLoss::SmoothL1,
            (LossKind::L1, true) => ChannelLoss::RadianL1,
            (LossKind::SmoothL1, true) => ChannelLoss::RadianSmoothL1,
        }
    }

    pub fn is_angular(&self) -> bool {
        matches!(self, ChannelLoss::RadianL1 | ChannelLoss::RadianSmoothL1)
    }

    /// Whether this strategy takes the circle penalty coefficient.
    pub const fn accepts_circle_penalty(&self) -> bool {
        matches!(self, ChannelLoss::RadianSmoothL1)
    }

    /// predicted, known: [n] → scalar loss [1]
    ///
    /// `circle_penalty` is ignored by strategies that do not accept it.
    pub fn compute<B: Backend>(
        &self,
        predicted: Tensor<B, 1>,
        known: Tensor<B, 1>,
        circle_penalty: f64,
    ) -> Tensor<B, 1> {
        match self {
            ChannelLoss::L1 => (predicted - known).abs().mean(),
            ChannelLoss::SmoothL1 => smooth_l1(predicted - known, LINEAR_SMOOTH_L1_BETA).mean(),
            ChannelLoss::RadianL1 => wrap_to_pi(known - predicted).abs().mean(),
            ChannelLoss::RadianSmoothL1 => {
                let loss = smooth_l1(wrap_to_pi(known - predicted.clone()), ANGULAR_SMOOTH_L1_BETA).mean();
                if circle_penalty > 0.0 {
                    let overshoot = predicted.abs().sub_scalar(PI).clamp_min(0.0).mean();
                    loss + overshoot.mul_scalar(circle_penalty)
                } else {
                    loss
                }
            }
        }
    }
}

/// Fold angle differences into [-π, π).
pub fn wrap_to_pi<B: Backend, const D: usize>(d: Tensor<B, D>) -> Tensor<B, D> {
    let turns = d.clone().add_scalar(PI).div_scalar(TAU).floor();
    d - turns.mul_scalar(TAU)
}

/// Elementwise Huber: 0.5 d²/β below β, |d| - β/2 above.
fn smooth_l1<B: Backend, const D: usize>(d: Tensor<B, D>, beta: f64) -> Tensor<B, D> {
    let abs = d.abs();
    let quadratic = abs.clone().powf_scalar(2.0).mul_scalar(0.5 / beta);
    let linear = abs.clone().sub_scalar(0.5 * beta);
    linear.mask_where(abs.lower_elem(beta), quadratic)
}

// ─── LossComposer ─────────────────────────────────────────────────────────────
/// One loss strategy per channel plus the circle penalty coefficient.
#[derive(Debug, Clone)]
pub struct LossComposer {
    per_channel: Vec<ChannelLoss>,
    circle_lambda: f64,
}

impl LossComposer {
    pub fn new(kind: LossKind, ft_is_angular: &[bool], circle_lambda: f64) -> Self {
        tracing::info!(
            "Mapping loss {} to list of losses corresponding to angular {:?}",
            kind.as_str(),
            ft_is_angular
        );
        let per_channel = ft_is_angular
            .iter()
            .map(|&is_angular| ChannelLoss::select(kind, is_angular))
            .collect();
        Self { per_channel, circle_lambda }
    }

    /// Resolve a persisted loss name (legacy aliases included).
    pub fn from_name(name: &str, ft_is_angular: &[bool], circle_lambda: f64) -> Result<Self, DiffusionError> {
        Ok(Self::new(LossKind::resolve(name)?, ft_is_angular, circle_lambda))
    }

    pub fn channel_losses(&self) -> &[ChannelLoss] {
        &self.per_channel
    }

    pub fn num_channels(&self) -> usize {
        self.per_channel.len()
    }

    /// predicted, known: [batch, seq, C], attn_mask: [batch, seq] → losses [C]
    pub fn loss_terms<B: Backend>(
        &self,
        predicted: Tensor<B, 3>,
        known: Tensor<B, 3>,
        attn_mask: Tensor<B, 2, Int>,
    ) -> Result<Tensor<B, 1>, DiffusionError> {
        let dims = known.dims();
        if predicted.dims() != dims {
            return Err(DiffusionError::shape("predicted noise", dims, predicted.dims()));
        }
        let [batch, seq_len, channels] = dims;
        if channels != self.per_channel.len() {
            return Err(DiffusionError::shape("noise channels", self.per_channel.len(), channels));
        }
        if attn_mask.dims() != [batch, seq_len] {
            return Err(DiffusionError::shape("attention mask", [batch, seq_len], attn_mask.dims()));
        }

        let unmasked = unmasked_flat_indices(attn_mask)?;
        let n_valid = unmasked.dims()[0];
        tracing::debug!("Gathered {} valid residues of {}", n_valid, batch * seq_len);

        // [batch * seq, C] → rows of valid residues only
        let predicted = predicted
            .reshape([batch * seq_len, channels])
            .select(0, unmasked.clone());
        let known = known
            .reshape([batch * seq_len, channels])
            .select(0, unmasked);

        let terms = self
            .per_channel
            .iter()
            .enumerate()
            .map(|(i, loss)| {
                let p = predicted.clone().slice([0..n_valid, i..i + 1]).reshape([n_valid]);
                let k = known.clone().slice([0..n_valid, i..i + 1]).reshape([n_valid]);
                loss.compute(p, k, self.circle_lambda)
            })
            .collect();
        Ok(Tensor::cat(terms, 0))
    }
}

/// Row-major flat indices (b * seq_len + l) of every nonzero mask entry.
fn unmasked_flat_indices<B: Backend>(attn_mask: Tensor<B, 2, Int>) -> Result<Tensor<B, 1, Int>, DiffusionError> {
    let [batch, seq_len] = attn_mask.dims();
    let device = attn_mask.device();
    let flags = attn_mask
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| DiffusionError::ShapeMismatch(format!("unreadable attention mask: {e:?}")))?;
    let indices: Vec<i64> = flags
        .iter()
        .enumerate()
        .filter(|(_, &flag)| flag != 0)
        .map(|(i, _)| i as i64)
        .collect();
    if indices.is_empty() {
        return Err(DiffusionError::EmptyMask { batch, seq_len });
    }
    let n = indices.len();
    Ok(Tensor::from_data(TensorData::new(indices, [n]), &device))
}
