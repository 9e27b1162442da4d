// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Pre-noised samples on disk all the way to tensor batches:
//
//   samples.jsonl
//       │
//       ▼
//   JsonlLoader       → parses and validates each sample
//       │
//       ▼
//   split_train_val   → shuffled train / validation split
//       │
//       ▼
//   NoisedDataset     → implements Burn's Dataset trait
//       │
//       ▼
//   NoisedBatcher     → pads and stacks samples into tensors
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop

/// Reads and validates JSON Lines sample files
pub mod loader;

/// Implements Burn's Dataset trait for noised samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;
