// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses command line arguments with clap and hands off to
// Layer 2 (application). Two commands are supported:
//   1. `train`  — fits a model on pre-noised samples and writes
//                 a bundle directory
//   2. `export` — restores a bundle, selects a checkpoint and
//                 copies the minimal file set elsewhere

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ExportArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "backbone-diffusion",
    version,
    about = "Train and export transformer noise predictors for protein backbone angle diffusion."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case; no computation happens here.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)  => run_train(args),
            Commands::Export(args) => run_export(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on samples in: {}", args.data.display());
    let out_dir = args.out_dir.clone();
    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Bundle written to '{}'.", out_dir.display());
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    use crate::application::export_use_case::ExportUseCase;

    let dest = args.dest.clone();
    let checkpoint = ExportUseCase::new(args.into()).execute()?;
    println!(
        "Exported '{}' to '{}'.",
        checkpoint.display(),
        dest.display()
    );
    Ok(())
}
