use std::collections::{BTreeMap, BTreeSet, HashMap};

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, VariabilityPolicy};
use crate::error::{ProfileError, Result};
use crate::grouping::{any_to_string, key_columns, partition_groups, Group};
use crate::period::period_columns;
use crate::preprocess::preprocess;
use crate::schema::{preprocessed, wide};
use crate::validation::{validate_rates, RateValidation};

/// Output of [`aggregate`].
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// One row per group, one Float64 column per period.
    pub table: DataFrame,
    /// Present when a rate column was validated.
    pub validation: Option<RateValidation>,
    /// Rows dropped by the preprocessor for lack of a usable date.
    pub dropped_rows: usize,
    /// Driver cells that were not numeric and counted as zero.
    pub unparsable_drivers: usize,
}

impl Aggregation {
    /// Apply the variability policy to the validation result, if any.
    pub fn enforce_policy(&self, policy: VariabilityPolicy) -> Result<()> {
        match &self.validation {
            Some(validation) => validation.apply_policy(policy),
            None => Ok(()),
        }
    }
}

/// Pivot production records into a dense group × period table.
///
/// Output columns, left to right: `ID` (when enabled), grouping columns, the
/// representative rate (when `rate_column` is given), then period columns in
/// chronological order. Rows are sorted by the grouping columns.
pub fn aggregate(
    df: &DataFrame,
    grouping: &[String],
    start_column: &str,
    driver_column: &str,
    rate_column: Option<&str>,
    config: &PipelineConfig,
) -> Result<Aggregation> {
    info!("Starting aggregation of '{driver_column}'. Grouping by: {grouping:?}");

    let passthrough: Vec<String> = rate_column.iter().map(|r| r.to_string()).collect();
    let pre = preprocess(
        df,
        grouping,
        start_column,
        driver_column,
        config.truncation_unit,
        &passthrough,
    )?;

    let validation = match rate_column {
        Some(rate) => Some(validate_rates(&pre.frame, grouping, rate, config.rate_tolerance)?),
        None => None,
    };

    let representative = validation
        .as_ref()
        .zip(rate_column)
        .map(|(v, rate)| (&v.representative_rates, rate));
    let table = pivot_periods(&pre.frame, grouping, representative, config)?;

    info!(
        "Aggregation complete: {} rows, {} cols",
        table.height(),
        table.width()
    );

    Ok(Aggregation {
        table,
        validation,
        dropped_rows: pre.dropped_rows,
        unparsable_drivers: pre.unparsable_drivers,
    })
}

fn key_of(df: &DataFrame, keys: &[String], row: usize) -> Result<Vec<Option<String>>> {
    keys.iter()
        .map(|k| Ok(any_to_string(&df.column(k)?.get(row)?)))
        .collect()
}

/// Sum of the driver per period for one group.
fn period_sums(group: &Group) -> Result<BTreeMap<String, f64>> {
    let periods = group.rows.column(preprocessed::PERIOD)?.str()?;
    let drivers = group.rows.column(preprocessed::NUMERIC_DRIVER)?.f64()?;

    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for (period, driver) in periods.into_iter().zip(drivers) {
        if let Some(period) = period {
            *sums.entry(period.to_string()).or_insert(0.0) += driver.unwrap_or(0.0);
        }
    }
    Ok(sums)
}

/// Pivot a preprocessed frame to wide form.
///
/// `representative` is the representative-rate table and the name of its rate
/// column; the rate is joined back onto each group by key.
pub fn pivot_periods(
    pre: &DataFrame,
    grouping: &[String],
    representative: Option<(&DataFrame, &str)>,
    config: &PipelineConfig,
) -> Result<DataFrame> {
    let groups = partition_groups(pre, grouping)?;
    let group_refs: Vec<&Group> = groups.iter().collect();

    let mut columns: Vec<Column> = Vec::new();
    if config.generate_ids {
        let ids: Vec<String> = if grouping.is_empty() {
            (1..=groups.len()).map(|n| n.to_string()).collect()
        } else {
            groups.iter().map(|g| g.identifier(&config.id_separator)).collect()
        };
        columns.push(Column::new(wide::ID.into(), ids));
    }
    columns.extend(key_columns(&group_refs, grouping, pre)?);

    if groups.is_empty() {
        warn!("No valid data after date parsing and filtering. Returning empty table.");
        return Ok(DataFrame::new(columns)?);
    }

    if let Some((rates, rate_column)) = representative {
        let mut lookup: HashMap<Vec<Option<String>>, Option<String>> = HashMap::new();
        let rate_values = rates.column(rate_column)?.cast(&DataType::String)?;
        let rate_values = rate_values.str()?;
        for row in 0..rates.height() {
            lookup.insert(key_of(rates, grouping, row)?, rate_values.get(row).map(str::to_string));
        }
        let joined: Vec<Option<String>> = groups
            .iter()
            .map(|g| lookup.get(&g.key_strings()).cloned().flatten())
            .collect();
        columns.push(Column::new(rate_column.into(), joined));
    }

    let sums: Vec<BTreeMap<String, f64>> = groups.iter().map(period_sums).collect::<Result<_>>()?;
    let all_periods: BTreeSet<&String> = sums.iter().flat_map(|s| s.keys()).collect();
    debug!("Pivot spans {} period(s) over {} group(s)", all_periods.len(), groups.len());

    for period in &all_periods {
        // Dense: a group with no rows in a period gets zero.
        let values: Vec<f64> = sums
            .iter()
            .map(|s| s.get(*period).copied().unwrap_or(0.0))
            .collect();
        columns.push(Column::new(period.as_str().into(), values));
    }

    let mut table = DataFrame::new(columns)?;
    if !grouping.is_empty() {
        table = table.sort(
            grouping.iter().map(String::as_str).collect::<Vec<_>>(),
            SortMultipleOptions::default(),
        )?;
    }

    ensure_numeric_periods(&table)?;
    Ok(table)
}

/// Every period column of a wide table must be Float64.
fn ensure_numeric_periods(table: &DataFrame) -> Result<()> {
    for name in period_columns(table) {
        let dtype = table.column(&name)?.dtype();
        if dtype != &DataType::Float64 {
            return Err(ProfileError::Integrity(format!(
                "period column '{name}' has type {dtype}, expected f64"
            )));
        }
    }
    Ok(())
}

/// Sum of every period cell in a wide table.
pub fn total_volume(table: &DataFrame) -> Result<f64> {
    let mut total = 0.0;
    for name in period_columns(table) {
        let values = table.column(&name)?.cast(&DataType::Float64)?;
        total += values.f64()?.into_iter().flatten().sum::<f64>();
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> DataFrame {
        DataFrame::new(vec![
            Column::new("Area".into(), &["B", "A", "A", "B", "A", "C"]),
            Column::new("Activity".into(), &["Dev", "Dev", "Dev", "Dev", "Stope", "Dev"]),
            Column::new(
                "Start".into(),
                &["2025-03-02", "2025-01-10", "2025-01-20", "2025-01-05", "2025-11-11", "bad"],
            ),
            Column::new("Meters".into(), &[5.0, 10.0, 2.5, 7.0, 4.0, 99.0]),
            Column::new(
                "SI Rate".into(),
                &["60.00meter/mo", "50.00meter/mo", "50.00meter/mo", "61.00meter/mo", "9.00meter/mo", "1.00meter/mo"],
            ),
        ])
        .unwrap()
    }

    fn floats(df: &DataFrame, name: &str) -> Vec<f64> {
        df.column(name).unwrap().f64().unwrap().into_iter().map(|v| v.unwrap()).collect()
    }

    fn strings(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap().to_string())
            .collect()
    }

    #[test]
    fn pivots_dense_sorted_table() {
        let out = aggregate(
            &sample(),
            &names(&["Area", "Activity"]),
            "Start",
            "Meters",
            None,
            &PipelineConfig::default(),
        )
        .unwrap();
        let table = &out.table;

        assert_eq!(out.dropped_rows, 1);
        assert_eq!(out.unparsable_drivers, 0);
        assert!(out.validation.is_none());
        assert_eq!(
            table.get_column_names_str(),
            vec!["ID", "Area", "Activity", "2025-01", "2025-03", "2025-11"]
        );
        assert_eq!(strings(table, "ID"), vec!["A | Dev", "A | Stope", "B | Dev"]);
        assert_eq!(floats(table, "2025-01"), vec![12.5, 0.0, 7.0]);
        assert_eq!(floats(table, "2025-03"), vec![0.0, 0.0, 5.0]);
        assert_eq!(floats(table, "2025-11"), vec![0.0, 4.0, 0.0]);
        for name in period_columns(table) {
            assert_eq!(table.column(&name).unwrap().null_count(), 0);
        }
        assert_eq!(total_volume(table).unwrap(), 28.5);
    }

    #[test]
    fn joins_representative_rate_before_periods() {
        let out = aggregate(
            &sample(),
            &names(&["Area"]),
            "Start",
            "Meters",
            Some("SI Rate"),
            &PipelineConfig::default(),
        )
        .unwrap();
        let table = &out.table;

        assert_eq!(
            table.get_column_names_str(),
            vec!["ID", "Area", "SI Rate", "2025-01", "2025-03", "2025-11"]
        );
        assert_eq!(strings(table, "SI Rate"), vec!["50.00meter/mo", "60.00meter/mo"]);

        let validation = out.validation.as_ref().unwrap();
        assert!(!validation.is_consistent);
        assert_eq!(validation.variable_group_count(), 2);
        assert!(out.enforce_policy(VariabilityPolicy::Block).is_err());
        assert!(out.enforce_policy(VariabilityPolicy::Warn).is_ok());
    }

    #[test]
    fn ids_can_be_disabled() {
        let config = PipelineConfig {
            generate_ids: false,
            ..Default::default()
        };
        let out = aggregate(&sample(), &names(&["Area"]), "Start", "Meters", None, &config).unwrap();
        assert_eq!(out.table.get_column_names_str()[0], "Area");
    }

    #[test]
    fn empty_grouping_uses_row_numbers() {
        let out = aggregate(&sample(), &[], "Start", "Meters", None, &PipelineConfig::default()).unwrap();
        assert_eq!(out.table.height(), 1);
        assert_eq!(strings(&out.table, "ID"), vec!["1"]);
        assert_eq!(total_volume(&out.table).unwrap(), 28.5);
    }

    #[test]
    fn no_dated_rows_gives_grouping_shape() {
        let df = sample().slice(5, 1);
        let out = aggregate(
            &df,
            &names(&["Area", "Activity"]),
            "Start",
            "Meters",
            Some("SI Rate"),
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.table.height(), 0);
        assert_eq!(out.table.get_column_names_str(), vec!["ID", "Area", "Activity"]);
    }

    #[test]
    fn reports_non_numeric_drivers() {
        let df = DataFrame::new(vec![
            Column::new("Area".into(), &["A", "A", "B"]),
            Column::new("Start".into(), &["2025-01-02", "2025-01-09", "2025-02-01"]),
            Column::new("Meters".into(), &["4", "n/a", "6.5"]),
        ])
        .unwrap();
        let out = aggregate(&df, &names(&["Area"]), "Start", "Meters", None, &PipelineConfig::default()).unwrap();

        assert_eq!(out.unparsable_drivers, 1);
        assert_eq!(out.dropped_rows, 0);
        assert_eq!(floats(&out.table, "2025-01"), vec![4.0, 0.0]);
        assert_eq!(total_volume(&out.table).unwrap(), 10.5);
    }

    #[test]
    fn rejects_non_numeric_period_columns() {
        let df = DataFrame::new(vec![
            Column::new("Area".into(), &["A"]),
            Column::new("2025-01".into(), &["oops"]),
        ])
        .unwrap();
        assert!(matches!(ensure_numeric_periods(&df), Err(ProfileError::Integrity(_))));
    }
}
