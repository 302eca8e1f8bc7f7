//! Flat-file input and export snapshots.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use polars::prelude::*;
use tracing::info;

use crate::error::{ProfileError, Result};
use crate::schema::stage;

/// Pipeline stage a snapshot was taken at; becomes the file name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Transformed,
    Aggregated,
    Smoothed,
    RateQa,
}

impl ExportStage {
    pub fn suffix(self) -> &'static str {
        match self {
            ExportStage::Transformed => stage::TRANSFORMED,
            ExportStage::Aggregated => stage::AGGREGATED,
            ExportStage::Smoothed => stage::SMOOTHED,
            ExportStage::RateQa => stage::RATE_QA,
        }
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for ExportStage {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            stage::TRANSFORMED => Ok(ExportStage::Transformed),
            stage::AGGREGATED => Ok(ExportStage::Aggregated),
            stage::SMOOTHED => Ok(ExportStage::Smoothed),
            stage::RATE_QA => Ok(ExportStage::RateQa),
            other => Err(ProfileError::InvalidInput(format!("unknown export stage '{other}'"))),
        }
    }
}

/// Load a CSV with every column as `String` and header whitespace trimmed.
pub fn read_csv_as_strings(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref().to_path_buf();
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.clone()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;

    info!("Loaded {}: {} rows, {} cols", path.display(), df.height(), df.width());
    Ok(df)
}

/// `<sheet>_<stage>.csv`, spaces in the sheet name replaced by underscores.
pub fn export_file_name(sheet: &str, stage: ExportStage) -> String {
    format!("{}_{}.csv", sheet.trim().replace(' ', "_"), stage)
}

/// Write `df` into `dir` under its deterministic export name.
///
/// Creates `dir` if needed and overwrites an existing snapshot of the same
/// sheet and stage. Returns the path written.
pub fn write_csv(df: &DataFrame, dir: impl AsRef<Path>, sheet: &str, stage: ExportStage) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(sheet, stage));

    let mut file = File::create(&path)?;
    let mut out = df.clone();
    CsvWriter::new(&mut file).include_header(true).finish(&mut out)?;

    info!("Exported {stage} snapshot ({} rows) to {}", df.height(), path.display());
    Ok(path)
}
