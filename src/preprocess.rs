//! Column selection, date parsing and driver coercion ahead of the pivot.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::{info, warn};

use crate::error::{ProfileError, Result};
use crate::period::TruncationUnit;
use crate::schema::preprocessed;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d-%b-%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// How the start column stores its dates. Resolved once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Temporal,
    Text,
}

impl DateSource {
    pub fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Date | DataType::Datetime(_, _) => DateSource::Temporal,
            _ => DateSource::Text,
        }
    }
}

/// Output of [`preprocess`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Selected and passthrough columns plus `numeric_driver` and `period`.
    pub frame: DataFrame,
    /// Rows dropped because their date was missing or unparsable.
    pub dropped_rows: usize,
    /// Driver values that could not be read as numbers and became zero.
    pub unparsable_drivers: usize,
}

/// Parse a date from free text, trying ISO, RFC 3339 and day-first layouts.
pub fn parse_date_lenient(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        })
}

fn parse_dates(column: &Column) -> Result<Vec<Option<NaiveDate>>> {
    match DateSource::of(column.dtype()) {
        DateSource::Temporal => {
            let dates = column.cast(&DataType::Date)?;
            Ok(dates.date()?.as_date_iter().collect())
        }
        DateSource::Text => {
            let text = column.cast(&DataType::String)?;
            Ok(text
                .str()?
                .into_iter()
                .map(|value| value.and_then(parse_date_lenient))
                .collect())
        }
    }
}

/// Lenient Float64 view of a column: nulls become zero, unparsable text
/// becomes zero and is counted.
pub fn coerce_numeric(column: &Column) -> Result<(Vec<f64>, usize)> {
    let mut unparsable = 0;
    let values = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|value| match value.map(|s| s.trim().parse::<f64>()) {
                Some(Ok(v)) => v,
                Some(Err(_)) => {
                    unparsable += 1;
                    0.0
                }
                None => 0.0,
            })
            .collect(),
        _ => column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|value| value.unwrap_or(0.0))
            .collect(),
    };
    Ok((values, unparsable))
}

/// Select the columns the pipeline needs, assign every row to a period and
/// coerce the driver to Float64.
///
/// Rows without a usable date are dropped; an all-dropped result is an empty
/// frame, not an error.
pub fn preprocess(
    df: &DataFrame,
    grouping: &[String],
    start_column: &str,
    driver_column: &str,
    unit: TruncationUnit,
    passthrough: &[String],
) -> Result<Preprocessed> {
    let mut selected: Vec<String> = Vec::new();
    for name in grouping
        .iter()
        .map(String::as_str)
        .chain([start_column, driver_column])
        .chain(passthrough.iter().map(String::as_str))
    {
        if !selected.iter().any(|s| s == name) {
            selected.push(name.to_string());
        }
    }

    let schema = df.schema();
    let missing: Vec<&String> = selected.iter().filter(|c| !schema.contains(c)).collect();
    if !missing.is_empty() {
        return Err(ProfileError::missing(missing.into_iter().cloned()));
    }

    let dates = parse_dates(df.column(start_column)?)?;
    let (drivers, unparsable_drivers) = coerce_numeric(df.column(driver_column)?)?;

    let dropped_rows = dates.iter().filter(|d| d.is_none()).count();
    if dropped_rows > 0 {
        warn!("Dropped {dropped_rows} row(s) with missing or unparsable '{start_column}'");
    }
    if unparsable_drivers > 0 {
        warn!("{unparsable_drivers} value(s) in '{driver_column}' were not numeric and count as zero");
    }

    let periods: Vec<Option<String>> = dates
        .iter()
        .map(|date| date.map(|d| unit.period_of(d).label()))
        .collect();

    let frame = df
        .select(selected.iter().map(String::as_str))?
        .hstack(&[
            Column::new(preprocessed::NUMERIC_DRIVER.into(), drivers),
            Column::new(preprocessed::PERIOD.into(), periods),
        ])?
        .lazy()
        .filter(col(preprocessed::PERIOD).is_not_null())
        .collect()?;

    info!(
        "Preprocessed '{driver_column}' by {:?}: {} rows, {} cols",
        unit,
        frame.height(),
        frame.width()
    );

    Ok(Preprocessed {
        frame,
        dropped_rows,
        unparsable_drivers,
    })
}
