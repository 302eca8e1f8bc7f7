//! Per-group rate consistency checks and the representative rate.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use polars::prelude::*;
use regex::Regex;
use tracing::{info, warn};

use crate::config::VariabilityPolicy;
use crate::error::{ProfileError, Result};
use crate::grouping::{key_columns, partition_groups, Group};
use crate::schema::rate_qa;

/// Result of [`validate_rates`].
#[derive(Debug, Clone)]
pub struct RateValidation {
    pub is_consistent: bool,
    /// Groups flagged variable, `None` when every group is consistent.
    pub variable_groups: Option<DataFrame>,
    /// Grouping columns plus the first rate string seen for each group.
    pub representative_rates: DataFrame,
    /// Rows whose rate had no leading number; excluded from the check only.
    pub unparsable_rate_count: usize,
    pub group_count: usize,
    pub message: String,
}

impl RateValidation {
    pub fn variable_group_count(&self) -> usize {
        self.variable_groups.as_ref().map_or(0, DataFrame::height)
    }

    /// Block or warn on variability according to `policy`.
    pub fn apply_policy(&self, policy: VariabilityPolicy) -> Result<()> {
        if self.is_consistent {
            return Ok(());
        }
        match policy {
            VariabilityPolicy::Block => Err(ProfileError::RateVariability {
                variable_groups: self.variable_group_count(),
            }),
            VariabilityPolicy::Warn => {
                warn!("{} Proceeding with the first rate of each group.", self.message);
                Ok(())
            }
        }
    }
}

fn leading_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*([0-9]*\.?[0-9]+)").expect("valid number regex"))
}

/// Leading numeric token of a rate string, e.g. `68.63` for `"68.63meter/mo"`.
pub fn leading_number(raw: &str) -> Option<f64> {
    leading_number_pattern()
        .captures(raw)
        .and_then(|caps| caps[1].parse().ok())
}

/// Spread statistics of one group's parsable rates.
struct RateStats {
    distinct: usize,
    min: (f64, String),
    max: (f64, String),
    example: String,
}

impl RateStats {
    fn spread(&self) -> f64 {
        self.max.0 - self.min.0
    }

    fn collect(rates: &[Option<String>]) -> (Option<Self>, usize) {
        let mut unparsable = 0;
        let mut stats: Option<RateStats> = None;
        let mut distinct: BTreeSet<&str> = BTreeSet::new();

        for raw in rates {
            let Some((raw, value)) = raw.as_deref().and_then(|r| leading_number(r).map(|v| (r, v))) else {
                unparsable += 1;
                continue;
            };
            distinct.insert(raw);
            match stats.as_mut() {
                None => {
                    stats = Some(RateStats {
                        distinct: 0,
                        min: (value, raw.to_string()),
                        max: (value, raw.to_string()),
                        example: raw.to_string(),
                    })
                }
                Some(s) => {
                    if value < s.min.0 {
                        s.min = (value, raw.to_string());
                    }
                    if value > s.max.0 {
                        s.max = (value, raw.to_string());
                    }
                }
            }
        }

        if let Some(s) = stats.as_mut() {
            s.distinct = distinct.len();
        }
        (stats, unparsable)
    }
}

fn rate_strings(group: &Group, rate_column: &str) -> Result<Vec<Option<String>>> {
    let rates = group.rows.column(rate_column)?.cast(&DataType::String)?;
    Ok(rates
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Check that every group reports a single rate, within `tolerance`.
///
/// A group is variable when it has more than one distinct rate string and
/// the numeric spread exceeds `tolerance`. The representative rate is the
/// first non-null rate of the group in row order and is produced for every
/// group regardless of the outcome.
pub fn validate_rates(
    df: &DataFrame,
    grouping: &[String],
    rate_column: &str,
    tolerance: f64,
) -> Result<RateValidation> {
    let schema = df.schema();
    let missing: Vec<&str> = grouping
        .iter()
        .map(String::as_str)
        .chain([rate_column])
        .filter(|c| !schema.contains(c))
        .collect();
    if !missing.is_empty() {
        return Err(ProfileError::missing(missing));
    }

    let groups = partition_groups(df, grouping)?;

    let mut representative: Vec<Option<String>> = Vec::with_capacity(groups.len());
    let mut variable: Vec<(&Group, RateStats)> = Vec::new();
    let mut unparsable_rate_count = 0;

    for group in &groups {
        let rates = rate_strings(group, rate_column)?;
        representative.push(rates.iter().flatten().next().cloned());

        let (stats, unparsable) = RateStats::collect(&rates);
        unparsable_rate_count += unparsable;
        if let Some(stats) = stats {
            if stats.distinct > 1 && stats.spread() > tolerance {
                variable.push((group, stats));
            }
        }
    }

    let group_refs: Vec<&Group> = groups.iter().collect();
    let mut rep_columns = key_columns(&group_refs, grouping, df)?;
    rep_columns.push(Column::new(rate_column.into(), representative));
    let representative_rates = DataFrame::new(rep_columns)?;

    let is_consistent = variable.is_empty();
    let variable_groups = if is_consistent {
        None
    } else {
        let refs: Vec<&Group> = variable.iter().map(|(g, _)| *g).collect();
        let mut columns = key_columns(&refs, grouping, df)?;
        columns.push(Column::new(
            rate_qa::DISTINCT_RATE_COUNT.into(),
            variable.iter().map(|(_, s)| s.distinct as u32).collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            rate_qa::MIN_RATE.into(),
            variable.iter().map(|(_, s)| s.min.1.clone()).collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            rate_qa::MAX_RATE.into(),
            variable.iter().map(|(_, s)| s.max.1.clone()).collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            rate_qa::RATE_SPREAD.into(),
            variable.iter().map(|(_, s)| s.spread()).collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            rate_qa::EXAMPLE_RATE.into(),
            variable.iter().map(|(_, s)| s.example.clone()).collect::<Vec<_>>(),
        ));
        Some(DataFrame::new(columns)?)
    };

    let mut message = if is_consistent {
        format!(
            "Rate in '{rate_column}' is consistent across all {} group(s).",
            groups.len()
        )
    } else {
        format!(
            "Rate variability detected in '{rate_column}' for {} of {} group(s) (tolerance {tolerance}).",
            variable.len(),
            groups.len()
        )
    };
    if unparsable_rate_count > 0 {
        message.push_str(&format!(
            " {unparsable_rate_count} row(s) had unparsable rates and were ignored during this check."
        ));
        warn!("{unparsable_rate_count} row(s) in '{rate_column}' had no numeric rate");
    }

    if is_consistent {
        info!("{message}");
    } else {
        warn!("{message}");
    }

    Ok(RateValidation {
        is_consistent,
        variable_groups,
        representative_rates,
        unparsable_rate_count,
        group_count: groups.len(),
        message,
    })
}
