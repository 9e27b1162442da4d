// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types shared by every other layer: the error
// taxonomy, the named options persisted in training_args.json,
// and the angle-definition lookup table.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O

/// Error taxonomy for the model core
pub mod error;

/// Named choices: time encoding, decoder head, loss, scheduler
pub mod options;

/// Angle-definition schemes → per-channel angular flags
pub mod angles;
