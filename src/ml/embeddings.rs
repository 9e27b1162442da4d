// ============================================================
// Layer 5 — Position Embeddings
// ============================================================
// Adds a learned absolute position embedding to the already
// projected per-residue features, then LayerNorm + dropout.
//
// Only the "absolute" mode adds anything. Other modes leave the
// features untouched before normalisation, so relative schemes
// can be layered in later without changing this component.

use burn::{
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig},
    prelude::*,
};

use crate::domain::error::DiffusionError;
use crate::ml::model::BertConfig;

pub const ABSOLUTE_POSITIONS: &str = "absolute";

#[derive(Module, Debug)]
pub struct BertEmbeddings<B: Backend> {
    /// None unless position_embedding_type == "absolute"
    position_embeddings: Option<Embedding<B>>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
    max_positions: usize,
}

impl<B: Backend> BertEmbeddings<B> {
    pub fn new(config: &BertConfig, device: &B::Device) -> Self {
        let position_embeddings = (config.position_embedding_type == ABSOLUTE_POSITIONS).then(|| {
            EmbeddingConfig::new(config.max_position_embeddings, config.hidden_size).init(device)
        });
        if position_embeddings.is_none() {
            tracing::warn!(
                "Position embedding type '{}' adds no position signal",
                config.position_embedding_type
            );
        }
        Self {
            position_embeddings,
            layer_norm: LayerNormConfig::new(config.hidden_size)
                .with_epsilon(config.layer_norm_eps)
                .init(device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
            max_positions: config.max_position_embeddings,
        }
    }

    /// input_embeds: [batch, seq_len, hidden], position_ids: [batch, seq_len]
    pub fn forward(
        &self,
        input_embeds: Tensor<B, 3>,
        position_ids: Option<Tensor<B, 2, Int>>,
    ) -> Result<Tensor<B, 3>, DiffusionError> {
        let position_ids = position_ids.ok_or(DiffusionError::MissingInput("position_ids"))?;
        let [batch, seq_len, _] = input_embeds.dims();
        if position_ids.dims() != [batch, seq_len] {
            return Err(DiffusionError::shape(
                "position_ids",
                [batch, seq_len],
                position_ids.dims(),
            ));
        }

        let mut embeddings = input_embeds;
        if let Some(table) = &self.position_embeddings {
            let min_id: i64 = position_ids.clone().min().into_scalar().elem();
            let max_id: i64 = position_ids.clone().max().into_scalar().elem();
            if min_id < 0 || max_id as usize >= self.max_positions {
                return Err(DiffusionError::ShapeMismatch(format!(
                    "position ids span [{min_id}, {max_id}], outside the {} learned positions",
                    self.max_positions
                )));
            }
            embeddings = embeddings + table.forward(position_ids);
        }

        let embeddings = self.layer_norm.forward(embeddings);
        Ok(self.dropout.forward(embeddings))
    }
}
