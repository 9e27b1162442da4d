// ============================================================
// Layer 3 — Named Options
// ============================================================
// Closed sets of choices that are persisted by name in
// training_args.json. Each one parses from its persisted
// string with FromStr and fails with DiffusionError::Config
// on an unknown name, so nothing ever silently defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::DiffusionError;

// ─── TimeEncoding ─────────────────────────────────────────────────────────────
/// How the scalar diffusion timestep is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEncoding {
    /// Fixed random Fourier features.
    GaussianFourier,
    /// Log-spaced sinusoidal frequencies.
    Sinusoidal,
}

impl TimeEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeEncoding::GaussianFourier => "gaussian_fourier",
            TimeEncoding::Sinusoidal => "sinusoidal",
        }
    }
}

impl FromStr for TimeEncoding {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian_fourier" => Ok(TimeEncoding::GaussianFourier),
            "sinusoidal" => Ok(TimeEncoding::Sinusoidal),
            other => Err(DiffusionError::Config(format!("unknown time encoding: {other}"))),
        }
    }
}

// ─── DecoderHead ──────────────────────────────────────────────────────────────
/// Per-position head mapping hidden states back to feature channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderHead {
    Linear,
    Mlp,
}

impl DecoderHead {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderHead::Linear => "linear",
            DecoderHead::Mlp => "mlp",
        }
    }
}

impl FromStr for DecoderHead {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(DecoderHead::Linear),
            "mlp" => Ok(DecoderHead::Mlp),
            other => Err(DiffusionError::Config(format!("unrecognized decoder: {other}"))),
        }
    }
}

// ─── LossKind ─────────────────────────────────────────────────────────────────
/// Loss family. Angular channels get the wrapped variant of the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    L1,
    SmoothL1,
}

/// Names written by older versions, mapped onto current ones.
const LEGACY_LOSS_NAMES: &[(&str, &str)] = &[("radian_l1_smooth", "smooth_l1")];

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::L1 => "l1",
            LossKind::SmoothL1 => "smooth_l1",
        }
    }

    /// Parse a loss name, remapping legacy aliases with a logged notice.
    pub fn resolve(name: &str) -> Result<Self, DiffusionError> {
        let canonical = LEGACY_LOSS_NAMES
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(legacy, current)| {
                tracing::info!("Autocorrecting loss {} to {}", legacy, current);
                *current
            })
            .unwrap_or(name);
        canonical.parse()
    }
}

impl FromStr for LossKind {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" => Ok(LossKind::L1),
            "smooth_l1" => Ok(LossKind::SmoothL1),
            other => Err(DiffusionError::Config(format!("unknown loss: {other}"))),
        }
    }
}

// ─── LrSchedulerKind ──────────────────────────────────────────────────────────
/// Learning-rate schedule policies, persisted under their historical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LrSchedulerKind {
    #[serde(rename = "OneCycleLR")]
    OneCycle,
    #[serde(rename = "LinearWarmup")]
    LinearWarmup,
}

impl LrSchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LrSchedulerKind::OneCycle => "OneCycleLR",
            LrSchedulerKind::LinearWarmup => "LinearWarmup",
        }
    }

    /// `None` and the empty string both mean "no scheduler".
    pub fn parse_optional(name: Option<&str>) -> Result<Option<Self>, DiffusionError> {
        match name {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }
}

impl FromStr for LrSchedulerKind {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OneCycleLR" => Ok(LrSchedulerKind::OneCycle),
            "LinearWarmup" => Ok(LrSchedulerKind::LinearWarmup),
            other => Err(DiffusionError::Config(format!("unknown lr scheduler: {other}"))),
        }
    }
}

// ─── BestBy ───────────────────────────────────────────────────────────────────
/// Which loss selected a saved checkpoint; names the checkpoint subfolder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestBy {
    Train,
    Valid,
}

impl BestBy {
    pub fn subfolder(&self) -> String {
        format!("best_by_{self}")
    }
}

impl fmt::Display for BestBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BestBy::Train => write!(f, "train"),
            BestBy::Valid => write!(f, "valid"),
        }
    }
}

impl FromStr for BestBy {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(BestBy::Train),
            "valid" => Ok(BestBy::Valid),
            other => Err(DiffusionError::Config(format!("best_by must be train or valid, got {other}"))),
        }
    }
}
