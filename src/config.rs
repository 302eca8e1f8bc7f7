//! Pipeline configuration.
//!
//! Passed explicitly into the aggregation, validation and smoothing entry
//! points. Every field has a default, so an empty YAML document is a valid
//! configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::period::TruncationUnit;
use crate::schema::wide;

pub const DEFAULT_RATE_TOLERANCE: f64 = 0.01;
pub const DEFAULT_RATE_COLUMN_ALIAS: &str = "SI {}";
/// Smoothing capacity for a driver with no configured entry.
pub const DEFAULT_CAPACITY: f64 = 1000.0;

/// What the caller should do when a group reports more than one rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariabilityPolicy {
    /// Stop the pipeline with [`crate::ProfileError::RateVariability`].
    Block,
    /// Log the variability and carry on with the representative rate.
    #[default]
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub truncation_unit: TruncationUnit,
    /// Absolute spread above which a group's rates count as variable.
    pub rate_tolerance: f64,
    pub variability_policy: VariabilityPolicy,
    pub generate_ids: bool,
    pub id_separator: String,
    /// Smoothing capacity per driver column name.
    pub default_capacities: BTreeMap<String, f64>,
    /// Name template for the normalized rate column; `{}` is the raw column.
    pub rate_column_alias: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            truncation_unit: TruncationUnit::Month,
            rate_tolerance: DEFAULT_RATE_TOLERANCE,
            variability_policy: VariabilityPolicy::Warn,
            generate_ids: true,
            id_separator: wide::DEFAULT_ID_SEPARATOR.to_string(),
            default_capacities: BTreeMap::new(),
            rate_column_alias: DEFAULT_RATE_COLUMN_ALIAS.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn capacity_for(&self, driver: &str) -> Option<f64> {
        self.default_capacities.get(driver).copied()
    }

    /// Configured capacity for `driver`, else [`DEFAULT_CAPACITY`].
    pub fn capacity_or_default(&self, driver: &str) -> f64 {
        self.capacity_for(driver).unwrap_or(DEFAULT_CAPACITY)
    }

    /// Name of the normalized rate column derived from `rate_column`.
    pub fn si_rate_column(&self, rate_column: &str) -> String {
        self.rate_column_alias.replace("{}", rate_column)
    }
}
