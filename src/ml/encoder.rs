// ============================================================
// Layer 5 — Transformer Encoder Stack
// ============================================================
// BERT-style post-norm encoder layers:
//
//   x = LayerNorm(x + Dropout(SelfAttention(x, bias)))
//   x = LayerNorm(x + Dropout(W2 · GELU(W1 · x)))
//
// Padding is handled with an additive bias on the attention
// scores rather than a boolean mask: valid residues get 0,
// padding gets -10000, so after softmax padded keys carry
// (numerically) no weight.

use burn::{
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{gelu, softmax},
};

use crate::domain::error::DiffusionError;
use crate::ml::model::BertConfig;

/// Score offset applied to padded key positions.
pub const MASKED_SCORE_BIAS: f64 = -10000.0;

/// attention_mask: [batch, seq_len] of 0/1 → additive bias [batch, 1, 1, seq_len]
pub fn extended_attention_bias<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 4> {
    let [batch, seq_len] = attention_mask.dims();
    let valid = attention_mask.float().clamp(0.0, 1.0);
    valid
        .neg()
        .add_scalar(1.0)
        .mul_scalar(MASKED_SCORE_BIAS)
        .reshape([batch, 1, 1, seq_len])
}

// ─── Self Attention ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertSelfAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl<B: Backend> BertSelfAttention<B> {
    fn new(config: &BertConfig, device: &B::Device) -> Self {
        let hidden = config.hidden_size;
        Self {
            query: LinearConfig::new(hidden, hidden).init(device),
            key: LinearConfig::new(hidden, hidden).init(device),
            value: LinearConfig::new(hidden, hidden).init(device),
            dropout: DropoutConfig::new(config.attention_probs_dropout_prob).init(),
            num_heads: config.num_attention_heads,
            head_dim: hidden / config.num_attention_heads,
        }
    }

    /// [batch, seq, hidden] → [batch, heads, seq, head_dim]
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq_len, _] = x.dims();
        x.reshape([batch, seq_len, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }

    fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq_len, hidden] = x.dims();
        let q = self.split_heads(self.query.forward(x.clone()));
        let k = self.split_heads(self.key.forward(x.clone()));
        let v = self.split_heads(self.value.forward(x));

        // [batch, heads, seq, seq]; bias broadcasts over heads and queries
        let scores = q
            .matmul(k.transpose())
            .div_scalar((self.head_dim as f64).sqrt())
            + bias;
        let probs = self.dropout.forward(softmax(scores, 3));

        probs
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq_len, hidden])
    }
}

// ─── Encoder Layer ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertLayer<B: Backend> {
    attention: BertSelfAttention<B>,
    attention_output: Linear<B>,
    attention_norm: LayerNorm<B>,
    intermediate: Linear<B>,
    output: Linear<B>,
    output_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> BertLayer<B> {
    fn new(config: &BertConfig, device: &B::Device) -> Self {
        let hidden = config.hidden_size;
        let norm = || {
            LayerNormConfig::new(hidden)
                .with_epsilon(config.layer_norm_eps)
                .init(device)
        };
        Self {
            attention: BertSelfAttention::new(config, device),
            attention_output: LinearConfig::new(hidden, hidden).init(device),
            attention_norm: norm(),
            intermediate: LinearConfig::new(hidden, config.intermediate_size).init(device),
            output: LinearConfig::new(config.intermediate_size, hidden).init(device),
            output_norm: norm(),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let attended = self.attention.forward(x.clone(), bias);
        let attended = self.dropout.forward(self.attention_output.forward(attended));
        let x = self.attention_norm.forward(x + attended);

        let ffn = self.output.forward(gelu(self.intermediate.forward(x.clone())));
        self.output_norm.forward(x + self.dropout.forward(ffn))
    }
}

// ─── Encoder Stack ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BertEncoder<B: Backend> {
    layers: Vec<BertLayer<B>>,
}

impl<B: Backend> BertEncoder<B> {
    pub fn new(config: &BertConfig, device: &B::Device) -> Result<Self, DiffusionError> {
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
            return Err(DiffusionError::Config(format!(
                "hidden size {} is not a multiple of {} attention heads",
                config.hidden_size, config.num_attention_heads
            )));
        }
        let layers = (0..config.num_hidden_layers)
            .map(|_| BertLayer::new(config, device))
            .collect();
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// x: [batch, seq, hidden], bias: [batch, 1, 1, seq] → [batch, seq, hidden]
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        self.layers
            .iter()
            .fold(x, |x, layer| layer.forward(x, bias.clone()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn config() -> BertConfig {
        BertConfig::new()
            .with_hidden_size(8)
            .with_num_attention_heads(2)
            .with_num_hidden_layers(2)
            .with_intermediate_size(16)
    }

    #[test]
    fn test_bias_values() {
        let device = Default::default();
        let mask = Tensor::<TestBackend, 2, Int>::from_ints([[1, 1, 0], [1, 0, 0]], &device);
        let bias = extended_attention_bias(mask);
        assert_eq!(bias.dims(), [2, 1, 1, 3]);
        let values = bias.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 0.0, -10000.0, 0.0, -10000.0, -10000.0]);
    }

    #[test]
    fn test_encoder_preserves_shape() {
        let device = Default::default();
        let encoder = BertEncoder::<TestBackend>::new(&config(), &device).unwrap();
        assert_eq!(encoder.num_layers(), 2);
        let x = Tensor::<TestBackend, 3>::random([3, 6, 8], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::<TestBackend, 2, Int>::ones([3, 6], &device);
        let out = encoder.forward(x, extended_attention_bias(mask));
        assert_eq!(out.dims(), [3, 6, 8]);
    }

    #[test]
    fn test_padded_keys_do_not_change_valid_outputs() {
        let device = Default::default();
        let encoder = BertEncoder::<TestBackend>::new(&config(), &device).unwrap();
        let x = Tensor::<TestBackend, 3>::random([1, 4, 8], burn::tensor::Distribution::Default, &device);
        let mask = Tensor::<TestBackend, 2, Int>::from_ints([[1, 1, 0, 0]], &device);

        let baseline = encoder.forward(x.clone(), extended_attention_bias(mask.clone()));
        // Scramble the padded residues only.
        let noise = Tensor::<TestBackend, 3>::ones([1, 2, 8], &device).mul_scalar(50.0);
        let scrambled = x.slice_assign([0..1, 2..4, 0..8], noise);
        let perturbed = encoder.forward(scrambled, extended_attention_bias(mask));

        let diff: f32 = (baseline.slice([0..1, 0..2, 0..8]) - perturbed.slice([0..1, 0..2, 0..8]))
            .abs()
            .max()
            .into_scalar()
            .elem();
        assert!(diff < 1e-4, "valid outputs moved by {diff}");
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let device = Default::default();
        let cfg = config().with_num_attention_heads(3);
        let err = BertEncoder::<TestBackend>::new(&cfg, &device).unwrap_err();
        assert!(matches!(err, DiffusionError::Config(_)));
    }
}
