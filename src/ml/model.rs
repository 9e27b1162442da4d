// ============================================================
// Layer 5 — Noise Prediction Model
// ============================================================
// A BERT encoder over continuous per-residue features instead of
// tokens, conditioned on the diffusion timestep:
//
//   features [B, L, C]
//       │  Linear C → H
//       ▼
//   + learned absolute position embedding, LayerNorm, dropout
//       │
//   + time embedding [B, 1, H]   (broadcast over positions)
//       │
//   encoder stack  (additive padding bias from the mask)
//       │
//   decoder head H → C
//       ▼
//   predicted noise [B, L, C]

use burn::{
    module::ParamId,
    nn::{Linear, LinearConfig},
    prelude::*,
};

use crate::domain::{
    error::DiffusionError,
    options::{DecoderHead, TimeEncoding},
};
use crate::ml::{
    decoder::TokenDecoder,
    embeddings::BertEmbeddings,
    encoder::{extended_attention_bias, BertEncoder},
    time_embed::TimeEmbedding,
};

// ─── Architecture Config ──────────────────────────────────────────────────────
// Persisted as config.json next to the training args. Field names
// follow the usual BERT config keys so existing files load as-is;
// unknown keys in the file are ignored.
#[derive(Config, Debug)]
pub struct BertConfig {
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_hidden_layers: usize,
    #[config(default = 12)]
    pub num_attention_heads: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,
    #[config(default = 0.1)]
    pub attention_probs_dropout_prob: f64,
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
    #[config(default = "String::from(\"absolute\")")]
    pub position_embedding_type: String,
    #[config(default = false)]
    pub is_decoder: bool,
}

#[derive(Config, Debug)]
pub struct DiffusionModelConfig {
    pub bert: BertConfig,
    /// One flag per feature channel; its length fixes the channel count.
    pub ft_is_angular: Vec<bool>,
    #[config(default = "TimeEncoding::GaussianFourier")]
    pub time_encoding: TimeEncoding,
    #[config(default = "DecoderHead::Mlp")]
    pub decoder: DecoderHead,
}

impl DiffusionModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DiffusionModel<B>, DiffusionError> {
        if self.bert.is_decoder {
            return Err(DiffusionError::Config(
                "decoder-only (generative) configurations are not supported".to_string(),
            ));
        }
        let n_inputs = self.ft_is_angular.len();
        if n_inputs == 0 {
            return Err(DiffusionError::Config("at least one feature channel is required".to_string()));
        }
        let hidden = self.bert.hidden_size;

        let model = DiffusionModel {
            inputs_to_hidden_dim: LinearConfig::new(n_inputs, hidden).init(device),
            embeddings: BertEmbeddings::new(&self.bert, device),
            encoder: BertEncoder::new(&self.bert, device)?,
            token_decoder: TokenDecoder::new(self.decoder, hidden, n_inputs, device),
            time_embed: TimeEmbedding::new(self.time_encoding, hidden, device)?,
            n_inputs,
        };
        tracing::info!(
            "Model ready: {} layers, hidden={}, {} channels, decoder={}, time={}",
            self.bert.num_hidden_layers,
            hidden,
            n_inputs,
            self.decoder.as_str(),
            self.time_encoding.as_str(),
        );
        Ok(model)
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct DiffusionModel<B: Backend> {
    inputs_to_hidden_dim: Linear<B>,
    embeddings: BertEmbeddings<B>,
    encoder: BertEncoder<B>,
    token_decoder: TokenDecoder<B>,
    time_embed: TimeEmbedding<B>,
    n_inputs: usize,
}

impl<B: Backend> DiffusionModel<B> {
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn decoder_head(&self) -> DecoderHead {
        self.token_decoder.head()
    }

    pub fn time_encoding(&self) -> TimeEncoding {
        self.time_embed.kind()
    }

    /// Parameters excluded from weight penalties (fixed Fourier frequencies).
    pub fn frozen_param_ids(&self) -> Vec<ParamId> {
        self.time_embed.frozen_param_ids()
    }

    /// Compare the projector and decoder weights against `n_inputs`.
    ///
    /// Loading a record swaps tensors in whatever shape they were saved,
    /// so a checkpoint trained with another channel count only shows up
    /// here.
    pub fn check_weight_shapes(&self) -> Result<(), DiffusionError> {
        let [proj_in, hidden] = self.inputs_to_hidden_dim.weight.val().dims();
        if proj_in != self.n_inputs {
            return Err(DiffusionError::shape("input projection", self.n_inputs, proj_in));
        }
        let expected = [hidden, self.n_inputs];
        let decoder = self.token_decoder.output_dims();
        if decoder != expected {
            return Err(DiffusionError::shape("decoder output", expected, decoder));
        }
        Ok(())
    }

    /// inputs:         [batch, seq_len, C]
    /// timestep:       [batch]
    /// attention_mask: [batch, seq_len], 1 = residue, 0 = padding
    /// position_ids:   [batch, seq_len], defaults to 0..seq_len per row
    ///
    /// Returns the predicted noise, [batch, seq_len, C].
    pub fn forward(
        &self,
        inputs: Tensor<B, 3>,
        timestep: Tensor<B, 1>,
        attention_mask: Tensor<B, 2, Int>,
        position_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, DiffusionError> {
        let [batch, seq_len, channels] = inputs.dims();
        tracing::debug!("Detected batch {} and seq length {}", batch, seq_len);
        if channels != self.n_inputs {
            return Err(DiffusionError::shape("input channels", self.n_inputs, channels));
        }
        if attention_mask.dims() != [batch, seq_len] {
            return Err(DiffusionError::shape(
                "attention mask",
                [batch, seq_len],
                attention_mask.dims(),
            ));
        }
        if timestep.dims() != [batch] {
            return Err(DiffusionError::shape("timestep", [batch], timestep.dims()));
        }

        let device = inputs.device();
        let position_ids = position_ids.unwrap_or_else(|| {
            Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
                .unsqueeze::<2>()
                .expand([batch, seq_len])
        });
        let bias = extended_attention_bias(attention_mask);

        let upscaled = self.inputs_to_hidden_dim.forward(inputs);
        let upscaled = self.embeddings.forward(upscaled, Some(position_ids))?;

        // [batch, H] → [batch, 1, H], broadcast over every residue
        let time_encoded = self.time_embed.forward(timestep).unsqueeze_dim::<3>(1);
        let sequence_output = self.encoder.forward(upscaled + time_encoded, bias);

        Ok(self.token_decoder.forward(sequence_output))
    }
}
