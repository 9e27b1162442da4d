// ============================================================
// Layer 5 — Per-Residue Output Heads
// ============================================================
// Maps contextualised hidden states back down to one value per
// feature channel (the predicted noise).
//
//   linear:  hidden → C
//   mlp:     hidden → hidden → GELU → LayerNorm → C
//            (the BERT masked-LM head shape)

use burn::{
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::gelu,
};

use crate::domain::options::DecoderHead;

const PREDICTOR_NORM_EPS: f64 = 1e-12;

#[derive(Module, Debug)]
pub struct AnglesPredictor<B: Backend> {
    dense1: Linear<B>,
    layer_norm: LayerNorm<B>,
    dense2: Linear<B>,
}

impl<B: Backend> AnglesPredictor<B> {
    pub fn new(d_model: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            dense1: LinearConfig::new(d_model, d_model).init(device),
            layer_norm: LayerNormConfig::new(d_model)
                .with_epsilon(PREDICTOR_NORM_EPS)
                .init(device),
            dense2: LinearConfig::new(d_model, d_out).init(device),
        }
    }

    /// [hidden, n_outputs] of the final projection.
    pub fn output_dims(&self) -> [usize; 2] {
        self.dense2.weight.val().dims()
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = gelu(self.dense1.forward(x));
        self.dense2.forward(self.layer_norm.forward(x))
    }
}

/// Exactly one of the two heads is populated.
#[derive(Module, Debug)]
pub struct TokenDecoder<B: Backend> {
    linear: Option<Linear<B>>,
    mlp: Option<AnglesPredictor<B>>,
}

impl<B: Backend> TokenDecoder<B> {
    pub fn new(head: DecoderHead, hidden: usize, n_outputs: usize, device: &B::Device) -> Self {
        match head {
            DecoderHead::Linear => Self {
                linear: Some(LinearConfig::new(hidden, n_outputs).init(device)),
                mlp: None,
            },
            DecoderHead::Mlp => Self {
                linear: None,
                mlp: Some(AnglesPredictor::new(hidden, n_outputs, device)),
            },
        }
    }

    pub fn head(&self) -> DecoderHead {
        if self.linear.is_some() {
            DecoderHead::Linear
        } else {
            DecoderHead::Mlp
        }
    }

    /// Weight dims of whichever head is populated, [hidden, n_outputs].
    pub fn output_dims(&self) -> [usize; 2] {
        match (&self.linear, &self.mlp) {
            (Some(linear), _) => linear.weight.val().dims(),
            (None, Some(mlp)) => mlp.output_dims(),
            (None, None) => [0, 0],
        }
    }

    /// [batch, seq, hidden] → [batch, seq, n_outputs]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match (&self.linear, &self.mlp) {
            (Some(linear), _) => linear.forward(x),
            (None, Some(mlp)) => mlp.forward(x),
            (None, None) => unreachable!("TokenDecoder is always built with one head"),
        }
    }
}
