//! prism-predict: risk predictions from serialized models.
//!
//! Loads `.rmo` risk model artifacts produced by prism-build and either
//! prints their summaries (`--list-models`) or scores the individuals in
//! a PED/MAP file pair against each model (`--predict`), writing one
//! tab-delimited `.prd` prediction file per model.

use clap::{ArgGroup, Parser};
use prism::individual::Genotypes;
use prism::io;
use prism::RiskModel;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "prism-predict",
    version,
    about = "Generates individual risk predictions from serialized PRISM risk models",
    group(ArgGroup::new("mode").required(true).args(["list_models", "predict"]))
)]
struct Cli {
    /// Print available risk model information to the console
    #[arg(short = 'l', long = "list-models")]
    list_models: bool,

    /// Generate risk predictions for the individuals in
    /// <InputBase>.ped / <InputBase>.map; output goes to one
    /// <InputBase>-<modelID>.prd file per model
    #[arg(short = 'p', long = "predict")]
    predict: bool,

    /// Model ID to use. When omitted, all models in the model directory
    /// are used.
    #[arg(short = 'm', long = "model-id")]
    model_id: Option<String>,

    /// Root path of the PED/MAP file pair, without extensions
    #[arg(short = 'i', long = "input-base", default_value = "subjects_genotypes")]
    input_base: String,

    /// Directory containing risk model object files from prism-build
    #[arg(short = 'd', long = "model-dir", default_value = ".")]
    model_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        println!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let models: BTreeMap<String, RiskModel> = match cli.model_id.as_deref() {
        Some(model_id) => io::load_named_model(&cli.model_dir, model_id)?,
        None => io::load_models(&cli.model_dir)?,
    };
    log::info!("loaded {} model(s) from {}", models.len(), cli.model_dir.display());

    if cli.list_models {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for model in models.values() {
            model.write_summary(&mut handle)?;
            println!();
        }
        return Ok(());
    }

    let map_path = PathBuf::from(format!("{}.map", cli.input_base));
    let ped_path = PathBuf::from(format!("{}.ped", cli.input_base));
    let map = io::read_map_file(&map_path)?;
    log::info!("MAP file lists {} SNPs", map.len());
    let individuals: Vec<Genotypes> = io::read_ped_file(&ped_path, &map)?;
    log::info!("read genotypes for {} individuals", individuals.len());

    println!("Outputting risk predictions to:");
    for (model_id, model) in &models {
        // The model is immutable, so individuals score independently.
        let predictions = individuals
            .par_iter()
            .map(|genos| model.predict(genos))
            .collect::<Result<Vec<_>, _>>()?;
        let out_path = PathBuf::from(format!("{}-{}.prd", cli.input_base, model_id));
        io::write_predictions(&out_path, &predictions)?;
        println!("{} --> {}", model.model_name(), out_path.display());
    }
    Ok(())
}
