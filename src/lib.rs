//! Production-schedule profiling: normalize activity rates, pivot records
//! into per-period volumes and smooth them under a capacity ceiling.

pub mod aggregation;
pub mod columns;
pub mod config;
pub mod error;
mod grouping;
pub mod io;
pub mod period;
pub mod preprocess;
pub mod rate;
pub mod schema;
pub mod smoothing;
pub mod validation;

#[cfg(feature = "python")]
mod python;

pub use aggregation::{aggregate, total_volume, Aggregation};
pub use columns::{generate_column, ColumnOperation};
pub use config::{PipelineConfig, VariabilityPolicy};
pub use error::{ProfileError, Result};
pub use io::{export_file_name, read_csv_as_strings, write_csv, ExportStage};
pub use period::{Period, TruncationUnit};
pub use preprocess::{preprocess, Preprocessed};
pub use rate::{add_si_rate_column, normalize_rate};
pub use smoothing::{simulate_stockpile, smooth, smooth_driver, StockpileRun, StockpileStep};
pub use validation::{validate_rates, RateValidation};
