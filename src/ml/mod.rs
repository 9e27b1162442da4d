// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All of the model, loss and training code. Data loading and
// bundle files are handled by layers 4 and 6; this layer only
// sees tensors, configs and the checkpoint manager.
//
//   time_embed.rs  — timestep → [batch, hidden] (Fourier / sinusoidal)
//   embeddings.rs  — learned absolute positions + LayerNorm + dropout
//   encoder.rs     — BERT-style encoder stack with additive mask bias
//   decoder.rs     — linear or MLP per-residue output head
//   model.rs       — BertConfig, DiffusionModelConfig, DiffusionModel
//   loss.rs        — per-channel angular / linear loss composition
//   schedule.rs    — OneCycleLR and LinearWarmup learning rates
//   trainer.rs     — DiffusionTrainer steps, epoch ends, train_loop
//   restore.rs     — rebuild model + trainer from a bundle directory

/// Timestep embeddings
pub mod time_embed;

/// Position embeddings
pub mod embeddings;

/// Transformer encoder stack
pub mod encoder;

/// Output heads
pub mod decoder;

/// Noise prediction model and its configs
pub mod model;

/// Per-channel loss composition
pub mod loss;

/// Learning-rate schedules
pub mod schedule;

/// Training controller and epoch loop
pub mod trainer;

/// Model reconstruction from a bundle directory
pub mod restore;
