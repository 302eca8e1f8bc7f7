//! Group partitioning shared by the validator and the pivot.
//!
//! Groups are listed in order of first appearance and keep their rows in the
//! original row order.

use polars::prelude::*;

use crate::error::Result;

/// One group: its key values (first row of the partition) and its rows.
pub struct Group {
    pub key: Vec<AnyValue<'static>>,
    pub rows: DataFrame,
}

impl Group {
    /// Key values rendered as text, null as `None`.
    pub fn key_strings(&self) -> Vec<Option<String>> {
        self.key.iter().map(any_to_string).collect()
    }

    /// Composite identifier: key values joined in declared column order.
    pub fn identifier(&self, separator: &str) -> String {
        self.key_strings()
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Render a cell as plain text (no quoting), `None` for null.
pub fn any_to_string(value: &AnyValue) -> Option<String> {
    match value {
        AnyValue::Null => None,
        AnyValue::String(s) => Some(s.to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        other => Some(format!("{other}")),
    }
}

/// Split `df` into groups by `keys`. An empty key list puts every row in a
/// single group; a zero-height frame has no groups.
pub fn partition_groups(df: &DataFrame, keys: &[String]) -> Result<Vec<Group>> {
    if df.height() == 0 {
        return Ok(Vec::new());
    }
    if keys.is_empty() {
        return Ok(vec![Group {
            key: Vec::new(),
            rows: df.clone(),
        }]);
    }

    let partitions = df.partition_by_stable(keys.iter().map(String::as_str), true)?;
    partitions
        .into_iter()
        .map(|rows| {
            let key = keys
                .iter()
                .map(|k| Ok(rows.column(k)?.get(0)?.into_static()))
                .collect::<Result<Vec<_>>>()?;
            Ok(Group { key, rows })
        })
        .collect()
}

/// Build one output column per key from the groups' key values.
pub fn key_columns(groups: &[&Group], keys: &[String], template: &DataFrame) -> Result<Vec<Column>> {
    keys.iter()
        .enumerate()
        .map(|(i, name)| {
            let dtype = template.column(name)?.dtype().clone();
            let values: Vec<AnyValue> = groups.iter().map(|g| g.key[i].clone()).collect();
            let series = if values.is_empty() {
                Series::new_empty(name.as_str().into(), &dtype)
            } else {
                Series::from_any_values_and_dtype(name.as_str().into(), &values, &dtype, true)?
            };
            Ok(series.into())
        })
        .collect()
}
