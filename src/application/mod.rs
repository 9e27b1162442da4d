// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each
// (training a model, exporting a trained one).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - No direct file access (that's Layer 4 and 6)
//   - Only workflow coordination

// The training workflow
pub mod train_use_case;

// Restore a bundle and copy out one checkpoint
pub mod export_use_case;
