use std::collections::HashMap;

use polars::prelude::*;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;
use tracing_subscriber::EnvFilter;

use crate::aggregation;
use crate::columns::{self, ColumnOperation};
use crate::config::{PipelineConfig, VariabilityPolicy};
use crate::io::{self, ExportStage};
use crate::rate;
use crate::schema::*;
use crate::smoothing;

fn parse_policy(policy: &str) -> PyResult<VariabilityPolicy> {
    match policy.trim().to_ascii_lowercase().as_str() {
        "block" => Ok(VariabilityPolicy::Block),
        "warn" => Ok(VariabilityPolicy::Warn),
        other => Err(PyValueError::new_err(format!(
            "Unknown variability policy '{other}'. Choose from 'block', 'warn'"
        ))),
    }
}

/// Install a `tracing` subscriber writing to stderr. `level` is an
/// env-filter directive; `RUST_LOG` wins when set.
#[pyfunction]
#[pyo3(signature = (level="info"))]
fn init_logging(level: &str) -> PyResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    // A second call keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    Ok(())
}

/// Normalize one rate string to `<value>.2f<SI unit>/mo`.
#[pyfunction]
fn normalize_rate(raw: &str) -> String {
    rate::normalize_rate(raw)
}

/// Append a normalized copy of `rate_column`, named `SI <rate_column>` by default.
#[pyfunction]
#[pyo3(signature = (df, rate_column, new_column=None))]
fn add_si_rate_column(df: PyDataFrame, rate_column: &str, new_column: Option<&str>) -> PyResult<PyDataFrame> {
    let name = match new_column {
        Some(name) => name.to_string(),
        None => PipelineConfig::default().si_rate_column(rate_column),
    };
    Ok(PyDataFrame(rate::add_si_rate_column(&df.0, rate_column, &name)?))
}

#[pyfunction]
fn generate_column(df: PyDataFrame, targets: Vec<String>, new_name: &str, operation: &str) -> PyResult<PyDataFrame> {
    let op: ColumnOperation = operation.parse()?;
    Ok(PyDataFrame(columns::generate_column(&df.0, &targets, new_name, op)?))
}

/// Pivot records into one row per group and one column per period.
///
/// Returns `(table, variable_groups, message)`; `variable_groups` is `None`
/// when no rate column was given or every group is consistent. With
/// `policy="block"` rate variability raises instead.
#[pyfunction]
#[pyo3(signature = (
    df,
    grouping,
    start_column,
    driver_column,
    rate_column=None,
    truncation_unit="month",
    tolerance=0.01,
    policy="warn",
    generate_ids=true,
))]
#[allow(clippy::too_many_arguments)]
fn aggregate(
    df: PyDataFrame,
    grouping: Vec<String>,
    start_column: &str,
    driver_column: &str,
    rate_column: Option<&str>,
    truncation_unit: &str,
    tolerance: f64,
    policy: &str,
    generate_ids: bool,
) -> PyResult<(PyDataFrame, Option<PyDataFrame>, Option<String>)> {
    let config = PipelineConfig {
        truncation_unit: truncation_unit.parse()?,
        rate_tolerance: tolerance,
        variability_policy: parse_policy(policy)?,
        generate_ids,
        ..Default::default()
    };

    let result = aggregation::aggregate(&df.0, &grouping, start_column, driver_column, rate_column, &config)?;
    result.enforce_policy(config.variability_policy)?;

    let (variable, message) = match result.validation {
        Some(v) => (v.variable_groups.map(PyDataFrame), Some(v.message)),
        None => (None, None),
    };
    Ok((PyDataFrame(result.table), variable, message))
}

/// Smooth a wide table. Without an explicit `capacity` the per-driver
/// capacity from `config_path` (or the built-in default) is used.
#[pyfunction]
#[pyo3(signature = (df, grouping, capacity=None, driver_column=None, config_path=None))]
fn smooth(
    df: PyDataFrame,
    grouping: Vec<String>,
    capacity: Option<f64>,
    driver_column: Option<&str>,
    config_path: Option<&str>,
) -> PyResult<PyDataFrame> {
    let out = match capacity {
        Some(capacity) => smoothing::smooth(&df.0, &grouping, capacity)?,
        None => {
            let config = match config_path {
                Some(path) => PipelineConfig::load(path)?,
                None => PipelineConfig::default(),
            };
            let driver = driver_column.unwrap_or_default();
            smoothing::smooth_driver(&df.0, &grouping, driver, &config)?
        }
    };
    Ok(PyDataFrame(out))
}

/// Load any CSV with all columns as strings, optionally renaming columns.
#[pyfunction]
#[pyo3(signature = (path, rename=None))]
fn load_csv(path: &str, rename: Option<HashMap<String, String>>) -> PyResult<PyDataFrame> {
    let mut df = io::read_csv_as_strings(path)?;
    if let Some(map) = rename {
        let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
        df = df
            .lazy()
            .rename(old, new, true)
            .collect()
            .map_err(crate::ProfileError::from)?;
    }
    Ok(PyDataFrame(df))
}

/// Write a stage snapshot; returns the path written.
#[pyfunction]
fn export_csv(df: PyDataFrame, directory: &str, sheet: &str, stage: &str) -> PyResult<String> {
    let stage: ExportStage = stage.parse()?;
    let path = io::write_csv(&df.0, directory, sheet, stage)?;
    Ok(path.display().to_string())
}

/// Export column-name constants as Python submodules.
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let pre = PyModule::new(m.py(), "preprocessed")?;
    pre.add("NUMERIC_DRIVER", preprocessed::NUMERIC_DRIVER)?;
    pre.add("PERIOD", preprocessed::PERIOD)?;
    m.add_submodule(&pre)?;

    let wide_mod = PyModule::new(m.py(), "wide")?;
    wide_mod.add("ID", wide::ID)?;
    wide_mod.add("DEFAULT_ID_SEPARATOR", wide::DEFAULT_ID_SEPARATOR)?;
    m.add_submodule(&wide_mod)?;

    let qa = PyModule::new(m.py(), "rate_qa")?;
    qa.add("DISTINCT_RATE_COUNT", rate_qa::DISTINCT_RATE_COUNT)?;
    qa.add("MIN_RATE", rate_qa::MIN_RATE)?;
    qa.add("MAX_RATE", rate_qa::MAX_RATE)?;
    qa.add("RATE_SPREAD", rate_qa::RATE_SPREAD)?;
    qa.add("EXAMPLE_RATE", rate_qa::EXAMPLE_RATE)?;
    m.add_submodule(&qa)?;

    let ops = PyModule::new(m.py(), "operation")?;
    ops.add("SUM", operation::SUM)?;
    ops.add("MULTIPLY", operation::MULTIPLY)?;
    ops.add("DIVIDE", operation::DIVIDE)?;
    m.add_submodule(&ops)?;

    let stages = PyModule::new(m.py(), "stage")?;
    stages.add("TRANSFORMED", stage::TRANSFORMED)?;
    stages.add("AGGREGATED", stage::AGGREGATED)?;
    stages.add("SMOOTHED", stage::SMOOTHED)?;
    stages.add("RATE_QA", stage::RATE_QA)?;
    m.add_submodule(&stages)?;

    Ok(())
}

#[pymodule]
fn mine_profile(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_rate, m)?)?;
    m.add_function(wrap_pyfunction!(add_si_rate_column, m)?)?;
    m.add_function(wrap_pyfunction!(generate_column, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate, m)?)?;
    m.add_function(wrap_pyfunction!(smooth, m)?)?;
    m.add_function(wrap_pyfunction!(load_csv, m)?)?;
    m.add_function(wrap_pyfunction!(export_csv, m)?)?;
    add_schema_exports(m)?;
    Ok(())
}
