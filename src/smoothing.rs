//! Capacity-constrained smoothing with a carry-over stockpile.
//!
//! Each group's series is walked in period order. Volume above capacity goes
//! to the stockpile; a shortfall is drawn back from it. Once the observed
//! periods end, extra months are appended until the stockpile is empty, so
//! the total volume of every group is preserved.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ProfileError, Result};
use crate::period::{period_columns, Period};
use crate::schema::wide;

/// Upper bound on synthesized depletion periods (ten years of months).
pub const MAX_DEPLETION_PERIODS: usize = 120;

/// One period of a simulated series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StockpileStep {
    pub period: Period,
    pub reported: f64,
    pub actual: f64,
    /// Stockpile balance after this period.
    pub stockpile: f64,
    /// True for periods appended after the observed series.
    pub synthesized: bool,
}

/// Result of walking one group's series.
#[derive(Debug, Clone, PartialEq)]
pub struct StockpileRun {
    pub steps: Vec<StockpileStep>,
    /// Volume left in the stockpile when the depletion ceiling was hit.
    pub residual: f64,
}

impl StockpileRun {
    pub fn total_reported(&self) -> f64 {
        self.steps.iter().map(|s| s.reported).sum()
    }

    pub fn total_actual(&self) -> f64 {
        self.steps.iter().map(|s| s.actual).sum()
    }

    pub fn synthesized_periods(&self) -> usize {
        self.steps.iter().filter(|s| s.synthesized).count()
    }
}

fn validate_capacity(capacity: f64) -> Result<()> {
    if capacity.is_finite() && capacity > 0.0 {
        Ok(())
    } else {
        Err(ProfileError::InvalidCapacity(capacity))
    }
}

/// Balances at or below this fraction of capacity count as empty.
const RESIDUE_RATIO: f64 = 1e-12;

/// Clamp floating-point residue left after a draw to zero.
fn settle(stockpile: f64, capacity: f64) -> f64 {
    if stockpile <= capacity * RESIDUE_RATIO {
        0.0
    } else {
        stockpile
    }
}

/// Walk `series` (sorted here by period) under a fixed monthly `capacity`.
pub fn simulate_stockpile(series: &[(Period, f64)], capacity: f64) -> Result<StockpileRun> {
    validate_capacity(capacity)?;

    let mut ordered = series.to_vec();
    ordered.sort_by_key(|(period, _)| *period);

    let mut steps = Vec::with_capacity(ordered.len());
    let mut stockpile = 0.0_f64;

    for (period, reported) in ordered {
        let actual = if reported >= capacity {
            stockpile += reported - capacity;
            capacity
        } else {
            let shortfall = capacity - reported;
            let draw = shortfall.min(stockpile);
            stockpile = settle(stockpile - draw, capacity);
            // `reported + shortfall` can round past capacity.
            if draw >= shortfall {
                capacity
            } else {
                reported + draw
            }
        };
        steps.push(StockpileStep {
            period,
            reported,
            actual,
            stockpile,
            synthesized: false,
        });
    }

    let mut residual = 0.0;
    if stockpile > 0.0 {
        if let Some(mut current) = steps.last().map(|s| s.period) {
            let mut appended = 0;
            while stockpile > 0.0 && appended < MAX_DEPLETION_PERIODS {
                current = current.next();
                let draw = stockpile.min(capacity);
                stockpile = settle(stockpile - draw, capacity);
                steps.push(StockpileStep {
                    period: current,
                    reported: 0.0,
                    actual: draw,
                    stockpile,
                    synthesized: true,
                });
                appended += 1;
            }
            if stockpile > 0.0 {
                warn!(
                    "Stockpile depletion exceeded the {MAX_DEPLETION_PERIODS}-period limit; {stockpile} left undistributed"
                );
                residual = stockpile;
            }
        }
    }

    Ok(StockpileRun { steps, residual })
}

/// Smooth every group of a wide table under `capacity`.
///
/// Groups whose series is entirely zero produce no row. The output holds the
/// `ID` column (if present), the grouping columns, and one column per period
/// seen in any group, including synthesized ones, with absent cells as zero.
pub fn smooth(df: &DataFrame, grouping: &[String], capacity: f64) -> Result<DataFrame> {
    validate_capacity(capacity)?;
    info!("Starting stockpile smoothing with capacity: {capacity}");

    let schema = df.schema();
    let missing: Vec<&String> = grouping.iter().filter(|c| !schema.contains(c)).collect();
    if !missing.is_empty() {
        return Err(ProfileError::missing(missing.into_iter().cloned()));
    }

    if df.height() == 0 {
        warn!("Empty table provided for smoothing");
        return Ok(df.clone());
    }
    let months = period_columns(df);
    if months.is_empty() {
        warn!("No period columns found");
        return Ok(df.clone());
    }

    let periods: Vec<Period> = months.iter().map(|m| m.parse()).collect::<Result<_>>()?;
    let values: Vec<Vec<f64>> = months
        .iter()
        .map(|m| {
            let column = df.column(m)?.cast(&DataType::Float64)?;
            Ok(column.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
        })
        .collect::<Result<_>>()?;

    let mut keep = vec![false; df.height()];
    let mut smoothed: Vec<BTreeMap<Period, f64>> = Vec::new();

    for (row, kept) in keep.iter_mut().enumerate() {
        let series: Vec<(Period, f64)> = periods
            .iter()
            .zip(&values)
            .map(|(period, column)| (*period, column[row]))
            .collect();
        if series.iter().all(|(_, v)| *v == 0.0) {
            continue;
        }

        let run = simulate_stockpile(&series, capacity)?;
        debug!(
            "Row {row}: {} period(s), {} synthesized, total {}",
            run.steps.len(),
            run.synthesized_periods(),
            run.total_actual()
        );
        smoothed.push(run.steps.iter().map(|s| (s.period, s.actual)).collect());
        *kept = true;
    }

    let mut label_columns: Vec<String> = Vec::new();
    if schema.contains(wide::ID) && !grouping.iter().any(|g| g == wide::ID) {
        label_columns.push(wide::ID.to_string());
    }
    label_columns.extend(grouping.iter().cloned());

    if smoothed.is_empty() {
        warn!("No data produced after smoothing.");
        return Ok(df.select(label_columns.iter().map(String::as_str))?.clear());
    }

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let labels = df.select(label_columns.iter().map(String::as_str))?.filter(&mask)?;

    let all_periods: BTreeSet<Period> = smoothed.iter().flat_map(|s| s.keys().copied()).collect();
    let period_cols: Vec<Column> = all_periods
        .iter()
        .map(|period| {
            let cells: Vec<f64> = smoothed
                .iter()
                .map(|s| s.get(period).copied().unwrap_or(0.0))
                .collect();
            Column::new(period.label().into(), cells)
        })
        .collect();

    let out = labels.hstack(&period_cols)?;
    info!("Stockpile smoothing complete. Result shape: ({}, {})", out.height(), out.width());
    Ok(out)
}

/// Smooth with the capacity configured for `driver_column`, falling back to
/// [`crate::config::DEFAULT_CAPACITY`].
pub fn smooth_driver(
    df: &DataFrame,
    grouping: &[String],
    driver_column: &str,
    config: &PipelineConfig,
) -> Result<DataFrame> {
    let capacity = config.capacity_or_default(driver_column);
    debug!("Capacity for '{driver_column}': {capacity}");
    smooth(df, grouping, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn months(start: Period, values: &[f64]) -> Vec<(Period, f64)> {
        let mut period = start;
        values
            .iter()
            .map(|v| {
                let entry = (period, *v);
                period = period.next();
                entry
            })
            .collect()
    }

    fn jan_2025() -> Period {
        Period::new(2025, 1).unwrap()
    }

    #[test]
    fn reference_trace() {
        let series = months(jan_2025(), &[0.0, 50.0, 40.0, 60.0, 90.0, 75.0, 0.0]);
        let run = simulate_stockpile(&series, 50.0).unwrap();

        let actual: Vec<f64> = run.steps.iter().map(|s| s.actual).collect();
        assert_eq!(actual, vec![0.0, 50.0, 40.0, 50.0, 50.0, 50.0, 50.0, 25.0]);
        let last = run.steps.last().unwrap();
        assert_eq!(last.period.label(), "2025-08");
        assert!(last.synthesized);
        assert_eq!(last.stockpile, 0.0);
        assert_eq!(run.synthesized_periods(), 1);
        assert_eq!(run.residual, 0.0);
        assert_eq!(run.total_actual(), run.total_reported());
    }

    #[test]
    fn orders_unsorted_input() {
        let series = vec![
            (Period::new(2025, 3).unwrap(), 10.0),
            (Period::new(2025, 1).unwrap(), 30.0),
        ];
        let run = simulate_stockpile(&series, 20.0).unwrap();
        let labels: Vec<String> = run.steps.iter().map(|s| s.period.label()).collect();
        assert_eq!(labels, vec!["2025-01", "2025-03"]);
        let actual: Vec<f64> = run.steps.iter().map(|s| s.actual).collect();
        assert_eq!(actual, vec![20.0, 20.0]);
    }

    #[test]
    fn depletion_stops_at_ceiling() {
        let series = months(Period::new(2024, 12).unwrap(), &[10_000.0]);
        let run = simulate_stockpile(&series, 1.0).unwrap();
        assert_eq!(run.synthesized_periods(), MAX_DEPLETION_PERIODS);
        assert_eq!(run.steps.len(), MAX_DEPLETION_PERIODS + 1);
        assert_eq!(run.residual, 10_000.0 - 1.0 - MAX_DEPLETION_PERIODS as f64);
        assert_eq!(run.steps.last().unwrap().period.label(), "2034-12");
    }

    #[test]
    fn full_draw_lands_exactly_on_capacity() {
        let capacity = 58.34132657735332;
        let series = months(Period::new(2020, 1).unwrap(), &[2.0549 * capacity, 0.3693 * capacity]);
        let run = simulate_stockpile(&series, capacity).unwrap();

        assert_eq!(run.steps[1].actual, capacity);
        assert!(run.steps.iter().all(|s| s.actual <= capacity));
    }

    #[test]
    fn rounding_residue_adds_no_period() {
        let series = months(jan_2025(), &[0.5, 0.1]);
        let run = simulate_stockpile(&series, 0.3).unwrap();

        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.synthesized_periods(), 0);
        let last = run.steps.last().unwrap();
        assert_eq!(last.stockpile, 0.0);
        assert!(last.actual <= 0.3);
        assert!((last.actual - 0.3).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_capacity() {
        let series = months(jan_2025(), &[1.0]);
        assert!(matches!(simulate_stockpile(&series, 0.0), Err(ProfileError::InvalidCapacity(_))));
        assert!(matches!(simulate_stockpile(&series, f64::NAN), Err(ProfileError::InvalidCapacity(_))));
    }

    fn wide_table() -> DataFrame {
        DataFrame::new(vec![
            Column::new("ID".into(), &["North | Gadgets", "South | Widgets", "West | Widgets"]),
            Column::new("Region".into(), &["North", "South", "West"]),
            Column::new("Product Line".into(), &["Gadgets", "Widgets", "Widgets"]),
            Column::new("SI Rate".into(), &["1.00meter/mo", "1.00meter/mo", "1.00meter/mo"]),
            Column::new("2025-01".into(), &[0.0, 0.0, 0.0]),
            Column::new("2025-02".into(), &[50.0, 0.0, 0.0]),
            Column::new("2025-03".into(), &[40.0, 0.0, 120.0]),
        ])
        .unwrap()
    }

    #[test]
    fn smooths_wide_table_and_skips_idle_groups() {
        let keys = vec!["Region".to_string(), "Product Line".to_string()];
        let out = smooth(&wide_table(), &keys, 50.0).unwrap();

        assert_eq!(
            out.get_column_names_str(),
            vec!["ID", "Region", "Product Line", "2025-01", "2025-02", "2025-03", "2025-04", "2025-05"]
        );
        assert_eq!(out.height(), 2);

        let row = |i: usize| -> Vec<f64> {
            ["2025-01", "2025-02", "2025-03", "2025-04", "2025-05"]
                .iter()
                .map(|m| out.column(m).unwrap().f64().unwrap().get(i).unwrap())
                .collect()
        };
        assert_eq!(row(0), vec![0.0, 50.0, 40.0, 0.0, 0.0]);
        assert_eq!(row(1), vec![0.0, 0.0, 50.0, 50.0, 20.0]);
    }

    #[test]
    fn all_idle_groups_give_empty_labels() {
        let df = wide_table().slice(1, 1);
        let out = smooth(&df, &["Region".to_string()], 50.0).unwrap();
        assert_eq!(out.height(), 0);
        assert_eq!(out.get_column_names_str(), vec!["ID", "Region"]);
    }

    #[test]
    fn missing_grouping_column_is_an_error() {
        let err = smooth(&wide_table(), &["Mine".to_string()], 50.0).unwrap_err();
        assert!(matches!(err, ProfileError::MissingColumns(cols) if cols == vec!["Mine"]));
    }

    #[test]
    fn driver_capacity_comes_from_config() {
        let keys = vec!["Region".to_string()];
        let mut config = PipelineConfig::default();
        config.default_capacities.insert("Meters".into(), 50.0);

        let configured = smooth_driver(&wide_table(), &keys, "Meters", &config).unwrap();
        assert_eq!(configured, smooth(&wide_table(), &keys, 50.0).unwrap());

        // Unconfigured drivers fall back to 1000, which nothing here reaches.
        let fallback = smooth_driver(&wide_table(), &keys, "Tonnes", &config).unwrap();
        assert_eq!(period_columns(&fallback), vec!["2025-01", "2025-02", "2025-03"]);
        let west: Vec<Option<f64>> = fallback.column("2025-03").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(west, vec![Some(40.0), Some(120.0)]);
    }
}
