// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the file system on behalf of the
// other layers:
//
//   checkpoint.rs   — the bundle directory: training_args.json,
//                     config.json and the best_by_* checkpoints
//                     (Burn named-MessagePack records)
//
//   predictions.rs  — per-step validation prediction dumps
//
//   metrics.rs      — per-epoch metrics CSV

/// Bundle files and model checkpoint saving/loading
pub mod checkpoint;

/// Validation prediction JSON dumps
pub mod predictions;

/// Training metrics CSV logger
pub mod metrics;
