// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `export`, and all
// their flags. Option names (decoder, time encoding, loss,
// scheduler, angle definition) are passed through as strings
// and validated by the layers below, so an unknown name fails
// with the same configuration error a bad bundle would.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::{
    export_use_case::ExportConfig,
    train_use_case::TrainConfig,
};
use crate::domain::options::BestBy;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a noise predictor on pre-noised JSON Lines samples
    Train(TrainArgs),

    /// Restore a trained bundle and copy one checkpoint out of it
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON Lines file of pre-noised samples
    #[arg(long)]
    pub data: PathBuf,

    /// Bundle directory for args, config, metrics and checkpoints
    #[arg(long, default_value = "results")]
    pub out_dir: PathBuf,

    /// Featurisation scheme: canonical, canonical-full-angles,
    /// canonical-minimal-angles or cart-coords
    #[arg(long, default_value = "canonical-full-angles")]
    pub angles_definitions: String,

    /// Comma-separated channel names used in metric keys
    #[arg(long, value_delimiter = ',')]
    pub ft_names: Option<Vec<String>>,

    /// gaussian_fourier or sinusoidal
    #[arg(long, default_value = "gaussian_fourier")]
    pub time_encoding: String,

    /// linear or mlp
    #[arg(long, default_value = "mlp")]
    pub decoder: String,

    /// l1 or smooth_l1
    #[arg(long, default_value = "smooth_l1")]
    pub loss: String,

    #[arg(long, default_value_t = 5e-5)]
    pub lr: f64,

    /// L1 penalty on trainable parameters
    #[arg(long, default_value_t = 0.0)]
    pub l1_norm: f64,

    /// AdamW weight decay
    #[arg(long, default_value_t = 0.0)]
    pub l2_norm: f64,

    /// Penalty on angular predictions outside [-pi, pi]
    #[arg(long, default_value_t = 0.0)]
    pub circle_reg: f64,

    #[arg(long, default_value_t = 10000)]
    pub epochs: usize,

    /// OneCycleLR or LinearWarmup; empty for a constant rate
    #[arg(long, default_value = "LinearWarmup")]
    pub lr_scheduler: String,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Fraction of samples used for training; the rest validate
    #[arg(long, default_value_t = 0.9)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 6489)]
    pub seed: u64,

    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    /// Dump every validation batch's predictions to <out_dir>/valid_preds
    #[arg(long)]
    pub write_valid_preds: bool,

    #[arg(long, default_value_t = 384)]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 12)]
    pub num_hidden_layers: usize,

    /// Must divide hidden_size
    #[arg(long, default_value_t = 12)]
    pub num_attention_heads: usize,

    #[arg(long, default_value_t = 768)]
    pub intermediate_size: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Longest sequence the position embedding can address
    #[arg(long, default_value_t = 128)]
    pub max_position_embeddings: usize,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_path:               a.data,
            out_dir:                 a.out_dir,
            angles_definitions:      a.angles_definitions,
            ft_names:                a.ft_names,
            time_encoding:           a.time_encoding,
            decoder:                 a.decoder,
            loss:                    a.loss,
            lr:                      a.lr,
            l1_norm:                 a.l1_norm,
            l2_norm:                 a.l2_norm,
            circle_reg:              a.circle_reg,
            epochs:                  a.epochs,
            lr_scheduler:            Some(a.lr_scheduler).filter(|s| !s.is_empty()),
            batch_size:              a.batch_size,
            train_fraction:          a.train_fraction,
            seed:                    a.seed,
            num_workers:             a.num_workers,
            write_valid_preds:       a.write_valid_preds,
            hidden_size:             a.hidden_size,
            num_hidden_layers:       a.num_hidden_layers,
            num_attention_heads:     a.num_attention_heads,
            intermediate_size:       a.intermediate_size,
            dropout:                 a.dropout,
            max_position_embeddings: a.max_position_embeddings,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Bundle directory written by `train`
    #[arg(long)]
    pub bundle_dir: PathBuf,

    /// Destination for the minimal bundle
    #[arg(long)]
    pub dest: PathBuf,

    /// Which checkpoint folder to pick from: train or valid
    #[arg(long, default_value = "valid")]
    pub best_by: BestBy,

    /// Index after sorting by epoch; negative counts from the end
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub idx: isize,
}

impl From<ExportArgs> for ExportConfig {
    fn from(a: ExportArgs) -> Self {
        ExportConfig {
            bundle_dir: a.bundle_dir,
            dest:       a.dest,
            best_by:    a.best_by,
            idx:        a.idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_args_into_config() {
        let cli = Cli::try_parse_from([
            "backbone-diffusion", "train",
            "--data", "samples.jsonl",
            "--lr-scheduler", "",
            "--ft-names", "phi,psi,omega,tau,theta,kappa",
            "--hidden-size", "64",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.data_path, PathBuf::from("samples.jsonl"));
        assert_eq!(cfg.lr_scheduler, None);
        assert_eq!(cfg.ft_names.as_ref().map(Vec::len), Some(6));
        assert_eq!(cfg.hidden_size, 64);
        assert_eq!(cfg.decoder, "mlp");
    }

    #[test]
    fn test_export_args_parse_negative_index() {
        let cli = Cli::try_parse_from([
            "backbone-diffusion", "export",
            "--bundle-dir", "results",
            "--dest", "shipped",
            "--best-by", "train",
            "--idx", "-2",
        ])
        .unwrap();
        let Commands::Export(args) = cli.command else { panic!("expected export") };
        let cfg: ExportConfig = args.into();
        assert_eq!(cfg.best_by, BestBy::Train);
        assert_eq!(cfg.idx, -2);
    }

    #[test]
    fn test_bad_best_by_rejected() {
        assert!(Cli::try_parse_from([
            "backbone-diffusion", "export",
            "--bundle-dir", "results",
            "--dest", "shipped",
            "--best-by", "test",
        ])
        .is_err());
    }
}
