//! Input tables, genotype files, model artifacts, and prediction output.
//!
//! Build-time inputs are tab-delimited tables with verified headers: one
//! SNP table (`<modelID>_SNPs.dat`) and one annual-incidence table
//! (`<modelID>_annInc.dat`) per model, both keyed by a `modelID` column
//! so a single file may feed several models. Predict-time inputs are a
//! MAP file (rs ID and allele orientation per row) and a PED file (one
//! individual per row: identifier followed by two allele tokens per MAP
//! row, in MAP order). Models are persisted as versioned bincode
//! artifacts with the `.rmo` extension.

use crate::incidence::{IncidenceError, IncidenceTable};
use crate::individual::{Genotypes, GenotypesError, RiskPrediction};
use crate::model::{ModelError, RiskModel};
use crate::snp::{AlleleOrientation, Snp, SnpError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version stamp written into every `.rmo` artifact.
pub const MODEL_FORMAT_VERSION: u32 = 1;
/// Extension of serialized risk-model files.
pub const MODEL_FILE_EXT: &str = "rmo";
/// Suffix of model SNP table files.
pub const SNP_FILE_SUFFIX: &str = "_SNPs.dat";
/// Suffix of annual-incidence table files.
pub const INCIDENCE_FILE_SUFFIX: &str = "_annInc.dat";

const SNP_TABLE_COLUMNS: [&str; 8] = [
    "modelID",
    "rsID",
    "sourcePub",
    "allele1",
    "allele2",
    "orientRs",
    "allele2Freq",
    "allele2lnHR",
];
const INCIDENCE_TABLE_COLUMNS: [&str; 3] = ["modelID", "ageYrs", "annInc"];

#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table error: {0}")]
    Polars(#[from] PolarsError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("model serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("{}: {message}", .path.display())]
    Format { path: PathBuf, message: String },
    #[error(transparent)]
    Snp(#[from] SnpError),
    #[error(transparent)]
    Genotypes(#[from] GenotypesError),
    #[error(transparent)]
    Incidence(#[from] IncidenceError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no model source files found in {}", .0.display())]
    NoModelSources(PathBuf),
    #[error("model {model_id} has SNPs but no annual incidence rows")]
    MissingIncidence { model_id: String },
    #[error("no .rmo model files found in {}", .0.display())]
    NoModels(PathBuf),
    #[error(
        "{}: unsupported model format version {found} \
         (this build reads version {expected})",
        .path.display()
    )]
    FormatVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// Raw per-model data parsed from the source tables.
#[derive(Debug, Default)]
pub struct ModelSources {
    snps: Vec<Snp>,
    incidence: IncidenceTable,
}

/// Parses every matching SNP and annual-incidence file in `source_dir`
/// and groups rows by model ID.
///
/// With `target_model_id` set, only `<id>_SNPs.dat` / `<id>_annInc.dat`
/// are read; otherwise all files with the expected suffixes are.
/// Incidence rows for model IDs without a SNP table are ignored.
pub fn read_model_sources(
    source_dir: &Path,
    target_model_id: Option<&str>,
) -> Result<BTreeMap<String, ModelSources>, IoError> {
    let mut sources: BTreeMap<String, ModelSources> = BTreeMap::new();
    let snp_files = matching_files(source_dir, SNP_FILE_SUFFIX, target_model_id)?;
    if snp_files.is_empty() {
        return Err(IoError::NoModelSources(source_dir.to_path_buf()));
    }
    for path in snp_files {
        log::info!("reading SNP table {}", path.display());
        read_snp_table(&path, &mut sources)?;
    }
    for path in matching_files(source_dir, INCIDENCE_FILE_SUFFIX, target_model_id)? {
        log::info!("reading annual incidence table {}", path.display());
        read_incidence_table(&path, &mut sources)?;
    }
    Ok(sources)
}

/// Builds a [`RiskModel`] for every parsed model and writes one
/// `<modelID>.rmo` artifact per model into `out_dir`. Returns the written
/// paths.
pub fn build_and_save_models(
    sources: BTreeMap<String, ModelSources>,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, IoError> {
    let mut written = Vec::with_capacity(sources.len());
    for (model_id, model_sources) in sources {
        if model_sources.incidence.is_empty() {
            return Err(IoError::MissingIncidence { model_id });
        }
        log::info!(
            "building model {} ({} SNPs, {} ages)",
            model_id,
            model_sources.snps.len(),
            model_sources.incidence.len()
        );
        let (times, marg_surv) = model_sources.incidence.to_survivor();
        let model = RiskModel::new(model_id.clone(), model_sources.snps, times, marg_surv)?;
        let path = out_dir.join(format!("{model_id}.{MODEL_FILE_EXT}"));
        save_model(&model, &path)?;
        log::info!("saved model {} to {}", model_id, path.display());
        written.push(path);
    }
    Ok(written)
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact<M> {
    format_version: u32,
    model: M,
}

/// Serializes a model to a versioned `.rmo` artifact.
pub fn save_model(model: &RiskModel, path: &Path) -> Result<(), IoError> {
    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(
        writer,
        &ModelArtifact {
            format_version: MODEL_FORMAT_VERSION,
            model,
        },
    )?;
    Ok(())
}

/// Deserializes a model from a `.rmo` artifact, verifying the format
/// version.
pub fn load_model(path: &Path) -> Result<RiskModel, IoError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let artifact: ModelArtifact<RiskModel> = bincode::deserialize_from(reader)?;
    if artifact.format_version != MODEL_FORMAT_VERSION {
        return Err(IoError::FormatVersion {
            path: path.to_path_buf(),
            found: artifact.format_version,
            expected: MODEL_FORMAT_VERSION,
        });
    }
    Ok(artifact.model)
}

/// Loads every `.rmo` artifact in `model_dir`, keyed by file stem.
pub fn load_models(model_dir: &Path) -> Result<BTreeMap<String, RiskModel>, IoError> {
    let mut models = BTreeMap::new();
    let mut paths: Vec<PathBuf> = fs::read_dir(model_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map_or(false, |ext| ext == MODEL_FILE_EXT)
        })
        .collect();
    paths.sort();
    for path in paths {
        let model_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("loading model {} from {}", model_id, path.display());
        models.insert(model_id, load_model(&path)?);
    }
    if models.is_empty() {
        return Err(IoError::NoModels(model_dir.to_path_buf()));
    }
    Ok(models)
}

/// Loads the single model `<model_id>.rmo` from `model_dir`.
pub fn load_named_model(
    model_dir: &Path,
    model_id: &str,
) -> Result<BTreeMap<String, RiskModel>, IoError> {
    let path = model_dir.join(format!("{model_id}.{MODEL_FILE_EXT}"));
    let mut models = BTreeMap::new();
    models.insert(model_id.to_string(), load_model(&path)?);
    Ok(models)
}

/// Parses a MAP file: one `rsID<TAB>orientation` row per SNP. Row order
/// defines the PED file's allele column order.
pub fn read_map_file(path: &Path) -> Result<Vec<(String, AlleleOrientation)>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut map = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 2 {
            return Err(IoError::Format {
                path: path.to_path_buf(),
                message: format!(
                    "expected 2 fields per MAP row, found {} on line {}",
                    record.len(),
                    map.len() + 1
                ),
            });
        }
        let orient: AlleleOrientation =
            record[1].parse().map_err(|message: &str| IoError::Format {
                path: path.to_path_buf(),
                message: format!("SNP {}: {message}", &record[0]),
            })?;
        map.push((record[0].to_string(), orient));
    }
    Ok(map)
}

/// Parses a PED file against a MAP descriptor: each row is an individual
/// identifier followed by two allele tokens per MAP SNP, in MAP order.
pub fn read_ped_file(
    path: &Path,
    map: &[(String, AlleleOrientation)],
) -> Result<Vec<Genotypes>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let expected_fields = 1 + 2 * map.len();
    let mut individuals = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != expected_fields {
            return Err(IoError::Format {
                path: path.to_path_buf(),
                message: format!(
                    "expected {} fields per PED row, found {} on line {}",
                    expected_fields,
                    record.len(),
                    individuals.len() + 1
                ),
            });
        }
        let mut genos = Genotypes::new(&record[0]);
        for (snp_idx, (rs_id, orient)) in map.iter().enumerate() {
            let allele1 = &record[1 + 2 * snp_idx];
            let allele2 = &record[2 + 2 * snp_idx];
            genos.add(rs_id, allele1, allele2, *orient)?;
        }
        individuals.push(genos);
    }
    Ok(individuals)
}

/// Writes one prediction per row to a tab-delimited `.prd` file:
/// `IndivID Model <geno per SNP> PI PIPctl PredCumRiskAge0..A`.
///
/// All predictions must come from the same model so that the genotype
/// and age columns line up; the header is derived from the first row.
pub fn write_predictions(path: &Path, predictions: &[RiskPrediction]) -> Result<(), IoError> {
    let Some(first) = predictions.first() else {
        log::warn!(
            "no predictions to write; skipping {}",
            path.display()
        );
        return Ok(());
    };
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header: Vec<String> = vec!["IndivID".into(), "Model".into()];
    header.extend(first.used_genotypes().iter().map(|(rs_id, _)| rs_id.clone()));
    header.push("PI".into());
    header.push("PIPctl".into());
    // Built models evaluate the survivor functions at integer ages, so
    // column i is the predicted cumulative risk at age i.
    header.extend((0..first.pred_cum_risk().len()).map(|age| format!("PredCumRiskAge{age}")));
    writer.write_record(&header)?;
    for prediction in predictions {
        let mut row: Vec<String> = vec![
            prediction.indiv_id().to_string(),
            prediction.model_name().to_string(),
        ];
        row.extend(
            prediction
                .used_genotypes()
                .iter()
                .map(|(_, genotype)| genotype.clone()),
        );
        row.push(prediction.prognostic_index().to_string());
        row.push(prediction.prognostic_index_pctl().to_string());
        row.extend(prediction.pred_cum_risk().iter().map(|risk| risk.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Lists the files in `dir` ending in `suffix`, restricted to
/// `<target>_<suffix>` when a target model ID is given, in sorted order.
fn matching_files(
    dir: &Path,
    suffix: &str,
    target_model_id: Option<&str>,
) -> Result<Vec<PathBuf>, IoError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let keep = match target_model_id {
            Some(target) => name == format!("{target}{suffix}"),
            None => name.ends_with(suffix),
        };
        if keep {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_table(path: &Path, expected_columns: &[&str]) -> Result<DataFrame, IoError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(b'\t'))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    let names = df.get_column_names();
    if names != expected_columns {
        return Err(IoError::Format {
            path: path.to_path_buf(),
            message: format!(
                "column headers are incorrect (expected {expected_columns:?}, found {names:?})"
            ),
        });
    }
    Ok(df)
}

fn str_column(df: &DataFrame, path: &Path, name: &str) -> Result<Vec<String>, IoError> {
    let series = df.column(name)?.cast(&DataType::String)?;
    series
        .str()?
        .into_iter()
        .map(|value| value.map(String::from))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| IoError::Format {
            path: path.to_path_buf(),
            message: format!("column '{name}' contains missing values"),
        })
}

fn f64_column(df: &DataFrame, path: &Path, name: &str) -> Result<Vec<f64>, IoError> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    series
        .f64()?
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| IoError::Format {
            path: path.to_path_buf(),
            message: format!("column '{name}' contains missing values"),
        })
}

fn age_column(df: &DataFrame, path: &Path, name: &str) -> Result<Vec<u32>, IoError> {
    let series = df.column(name)?.cast(&DataType::Int64)?;
    series
        .i64()?
        .into_iter()
        .map(|value| value.and_then(|v| u32::try_from(v).ok()))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| IoError::Format {
            path: path.to_path_buf(),
            message: format!("column '{name}' contains missing or negative values"),
        })
}

fn read_snp_table(
    path: &Path,
    sources: &mut BTreeMap<String, ModelSources>,
) -> Result<(), IoError> {
    let df = read_table(path, &SNP_TABLE_COLUMNS)?;
    let model_ids = str_column(&df, path, "modelID")?;
    let rs_ids = str_column(&df, path, "rsID")?;
    let source_pubs = str_column(&df, path, "sourcePub")?;
    let allele1s = str_column(&df, path, "allele1")?;
    let allele2s = str_column(&df, path, "allele2")?;
    let orients = str_column(&df, path, "orientRs")?;
    let freqs = f64_column(&df, path, "allele2Freq")?;
    let ln_hrs = f64_column(&df, path, "allele2lnHR")?;
    for row in 0..df.height() {
        let orient: AlleleOrientation =
            orients[row]
                .parse()
                .map_err(|message: &str| IoError::Format {
                    path: path.to_path_buf(),
                    message: format!("SNP {}: {message}", rs_ids[row]),
                })?;
        let snp = Snp::new(
            rs_ids[row].clone(),
            source_pubs[row].clone(),
            &allele1s[row],
            &allele2s[row],
            orient,
            freqs[row],
            ln_hrs[row],
        )?;
        sources
            .entry(model_ids[row].clone())
            .or_default()
            .snps
            .push(snp);
    }
    Ok(())
}

fn read_incidence_table(
    path: &Path,
    sources: &mut BTreeMap<String, ModelSources>,
) -> Result<(), IoError> {
    let df = read_table(path, &INCIDENCE_TABLE_COLUMNS)?;
    let model_ids = str_column(&df, path, "modelID")?;
    let ages = age_column(&df, path, "ageYrs")?;
    let incidences = f64_column(&df, path, "annInc")?;
    for row in 0..df.height() {
        // Incidence rows are only meaningful for models with SNPs.
        if let Some(model_sources) = sources.get_mut(&model_ids[row]) {
            model_sources.incidence.push(ages[row], incidences[row])?;
        }
    }
    Ok(())
}
