// ============================================================
// Layer 5 — Timestep Embedding
// ============================================================
// Maps one scalar diffusion timestep per sequence to a
// hidden_size vector that is added at every residue position.
//
//   gaussian_fourier:  W ~ N(0, 1) · 2π   (fixed, length H/2)
//                      emb = [sin(2π t W), cos(2π t W)]
//
//   sinusoidal:        f_i = exp(-i · ln(10000) / (H/2 - 1))
//                      emb = [sin(t f), cos(t f)]
//
// The Fourier frequencies are a frozen Param rather than a plain
// tensor so they are written into checkpoints with the weights.

use burn::{
    module::{Param, ParamId},
    prelude::*,
    tensor::Distribution,
};
use std::f64::consts::{LN_10, TAU};

use crate::domain::{error::DiffusionError, options::TimeEncoding};

#[derive(Module, Debug)]
pub struct TimeEmbedding<B: Backend> {
    /// Random Fourier frequencies, only present for gaussian_fourier.
    fourier_w: Option<Param<Tensor<B, 1>>>,
    dim: usize,
}

impl<B: Backend> TimeEmbedding<B> {
    pub fn new(kind: TimeEncoding, dim: usize, device: &B::Device) -> Result<Self, DiffusionError> {
        if dim % 2 != 0 || dim < 4 {
            return Err(DiffusionError::Config(format!(
                "time embedding needs an even hidden size >= 4, got {dim}"
            )));
        }
        let fourier_w = match kind {
            TimeEncoding::GaussianFourier => {
                let w = Tensor::<B, 1>::random([dim / 2], Distribution::Normal(0.0, 1.0), device)
                    .mul_scalar(TAU);
                Some(Param::from_tensor(w).set_require_grad(false))
            }
            TimeEncoding::Sinusoidal => None,
        };
        tracing::debug!("Using time embedding: {} (dim={})", kind.as_str(), dim);
        Ok(Self { fourier_w, dim })
    }

    pub fn kind(&self) -> TimeEncoding {
        match self.fourier_w {
            Some(_) => TimeEncoding::GaussianFourier,
            None => TimeEncoding::Sinusoidal,
        }
    }

    /// Ids of parameters that are never trained.
    pub fn frozen_param_ids(&self) -> Vec<ParamId> {
        self.fourier_w.iter().map(|w| w.id).collect()
    }

    /// time: [batch] → [batch, dim]
    pub fn forward(&self, time: Tensor<B, 1>) -> Tensor<B, 2> {
        match &self.fourier_w {
            Some(w) => {
                // [batch, 1] * [1, dim/2]
                let proj = time.unsqueeze_dim::<2>(1) * w.val().unsqueeze_dim::<2>(0);
                let proj = proj.mul_scalar(TAU);
                Tensor::cat(vec![proj.clone().sin(), proj.cos()], 1)
            }
            None => {
                let freqs = sinusoidal_frequencies(self.dim);
                let freqs = Tensor::<B, 1>::from_floats(freqs.as_slice(), &time.device());
                let args = time.unsqueeze_dim::<2>(1) * freqs.unsqueeze_dim::<2>(0);
                Tensor::cat(vec![args.clone().sin(), args.cos()], 1)
            }
        }
    }
}

/// Log-spaced frequencies, length dim / 2.
fn sinusoidal_frequencies(dim: usize) -> Vec<f32> {
    let half_dim = dim / 2;
    // ln(10000) = 4 ln(10)
    let step = 4.0 * LN_10 / (half_dim as f64 - 1.0);
    (0..half_dim)
        .map(|i| (-(i as f64) * step).exp() as f32)
        .collect()
}

/// Collapse a timestep tensor to [batch].
///
/// Accepts [batch] or [batch, 1, ...]; any trailing dimension other
/// than 1 is a shape error.
pub fn normalize_timesteps<B: Backend, const D: usize>(
    t: Tensor<B, D>,
) -> Result<Tensor<B, 1>, DiffusionError> {
    let dims = t.dims();
    if dims[1..].iter().any(|&d| d != 1) {
        return Err(DiffusionError::shape("timestep", "[batch] or [batch, 1]", dims));
    }
    Ok(t.reshape([dims[0]]))
}

/// A single scalar timestep as a batch of one.
pub fn timestep_from_scalar<B: Backend>(t: f32, device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_floats([t], device)
}
