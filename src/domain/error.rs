// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every fatal condition raised by the model core. None of these
// are retried internally; they surface synchronously to the caller.
//
// The application and CLI layers wrap these in anyhow with
// extra context, the same way they wrap I/O errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by model construction, forward passes, loss
/// composition and checkpoint handling.
#[derive(Debug, Error)]
pub enum DiffusionError {
    /// Unknown decoder / time encoding / scheduler / loss / angle
    /// definition name, or an unsupported architecture setting.
    #[error("configuration error: {0}")]
    Config(String),

    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A required input was not supplied.
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// The attention mask selects no position at all, so there is
    /// nothing to average a loss over.
    #[error("attention mask has no valid positions (batch of {batch} x {seq_len})")]
    EmptyMask { batch: usize, seq_len: usize },

    /// Checkpoint listing, selection or decoding failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DiffusionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }

    /// Shorthand for building a shape error from two displayable shapes.
    pub fn shape(what: &str, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Self::ShapeMismatch(format!("{what}: expected {expected:?}, got {actual:?}"))
    }
}

pub type Result<T> = std::result::Result<T, DiffusionError>;
