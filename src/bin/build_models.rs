//! prism-build: constructs and serializes risk models.
//!
//! Reads `<modelID>_SNPs.dat` and `<modelID>_annInc.dat` source tables,
//! converts the annual incidences into a marginal survivor function,
//! recovers the baseline survivor function under the model's genotype
//! distribution, and saves each resulting risk model as a `<modelID>.rmo`
//! artifact for later use by prism-predict.

use clap::Parser;
use prism::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "prism-build",
    version,
    about = "Builds serialized PRISM risk models from SNP and annual incidence tables"
)]
struct Cli {
    /// Model ID to build. When omitted, models are built for every
    /// <modelID>_SNPs.dat / <modelID>_annInc.dat pair found in the
    /// source directory.
    #[arg(short = 'm', long = "model-id")]
    model_id: Option<String>,

    /// Directory searched for model source files
    #[arg(short = 's', long = "src-dir", default_value = ".")]
    src_dir: PathBuf,

    /// Directory in which the risk model object files are saved
    #[arg(short = 'o', long = "out-dir", default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        // Failures are echoed to standard output and reported through
        // the exit code.
        println!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: &Cli) -> Result<(), io::IoError> {
    log::info!("reading model source files from {}", cli.src_dir.display());
    let sources = io::read_model_sources(&cli.src_dir, cli.model_id.as_deref())?;
    log::info!("parsed source tables for {} model(s)", sources.len());
    let written = io::build_and_save_models(sources, &cli.out_dir)?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}
