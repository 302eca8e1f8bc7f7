use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProfileError>;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Target columns list cannot be empty")]
    EmptyTargetColumns,

    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("Unsupported operation: '{0}'. Choose from 'sum', 'multiply', 'divide'")]
    UnsupportedOperation(String),

    #[error("Division requires exactly two target columns (numerator, denominator), got {0}")]
    DivideArity(usize),

    #[error("Invalid truncation unit: '{0}'")]
    InvalidTruncationUnit(String),

    #[error("Capacity must be a positive finite number, got {0}")]
    InvalidCapacity(f64),

    #[error("Rate variability detected in {variable_groups} group(s); aggregation blocked")]
    RateVariability { variable_groups: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Integrity: {0}")]
    Integrity(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl ProfileError {
    /// Build a missing-columns error with the names sorted and deduplicated.
    pub fn missing<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = columns.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        ProfileError::MissingColumns(names)
    }
}

#[cfg(feature = "python")]
mod python {
    use super::ProfileError;
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::PyErr;

    impl From<ProfileError> for PyErr {
        fn from(err: ProfileError) -> PyErr {
            match err {
                ProfileError::Integrity(_)
                | ProfileError::Polars(_)
                | ProfileError::Io(_) => PyRuntimeError::new_err(err.to_string()),
                _ => PyValueError::new_err(err.to_string()),
            }
        }
    }
}
