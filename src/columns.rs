use std::str::FromStr;

use polars::prelude::*;
use tracing::info;

use crate::error::{ProfileError, Result};
use crate::schema::operation;

/// Elementwise operation used to derive a new column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOperation {
    Sum,
    Multiply,
    Divide,
}

impl FromStr for ColumnOperation {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            operation::SUM => Ok(ColumnOperation::Sum),
            operation::MULTIPLY => Ok(ColumnOperation::Multiply),
            operation::DIVIDE => Ok(ColumnOperation::Divide),
            other => Err(ProfileError::UnsupportedOperation(other.to_string())),
        }
    }
}

/// Lenient Float64 view of a column: text is stripped before the cast and
/// anything unparsable or null becomes zero.
fn numeric(name: &str, dtype: &DataType) -> Expr {
    let source = match dtype {
        DataType::String => col(name).str().strip_chars(lit(" \t\r\n")),
        _ => col(name),
    };
    source.cast(DataType::Float64).fill_null(lit(0.0))
}

/// Derive `new_name` from `targets` and append it after the existing columns.
///
/// The input frame is left untouched. Dividing by zero yields null for that row.
pub fn generate_column(
    df: &DataFrame,
    targets: &[String],
    new_name: &str,
    op: ColumnOperation,
) -> Result<DataFrame> {
    if targets.is_empty() {
        return Err(ProfileError::EmptyTargetColumns);
    }
    let schema = df.schema();
    if schema.contains(new_name) {
        return Err(ProfileError::DuplicateColumn(new_name.to_string()));
    }
    let missing: Vec<&String> = targets.iter().filter(|t| !schema.contains(t)).collect();
    if !missing.is_empty() {
        return Err(ProfileError::missing(missing.into_iter().cloned()));
    }
    if op == ColumnOperation::Divide && targets.len() != 2 {
        return Err(ProfileError::DivideArity(targets.len()));
    }

    let operands: Vec<Expr> = targets
        .iter()
        .map(|t| {
            let dtype = schema.get(t).cloned().unwrap_or(DataType::String);
            numeric(t, &dtype)
        })
        .collect();

    let expr = match op {
        ColumnOperation::Sum => operands.into_iter().reduce(|a, b| a + b),
        ColumnOperation::Multiply => operands.into_iter().reduce(|a, b| a * b),
        ColumnOperation::Divide => {
            let mut it = operands.into_iter();
            match (it.next(), it.next()) {
                (Some(numerator), Some(denominator)) => Some(
                    numerator
                        / when(denominator.clone().eq(lit(0.0)))
                            .then(lit(NULL).cast(DataType::Float64))
                            .otherwise(denominator),
                ),
                _ => None,
            }
        }
    }
    .ok_or(ProfileError::EmptyTargetColumns)?;

    let out = df
        .clone()
        .lazy()
        .with_column(expr.alias(new_name))
        .collect()?;

    info!(
        "Generated column '{new_name}' from {:?} ({:?}): {} rows",
        targets,
        op,
        out.height()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        DataFrame::new(vec![
            Column::new("A".into(), &[1.0, 2.0, 3.0, 4.0, 5.0]),
            Column::new("B".into(), &[10.0, 20.0, 30.0, 40.0, 50.0]),
            Column::new("C".into(), &[2.0, 4.0, 2.0, 5.0, 10.0]),
            Column::new("D_str".into(), &["1.5", " 2.5 ", "not a number", "4", "5.5"]),
            Column::new("Z".into(), &[1.0, 0.0, 2.0, 0.0, 4.0]),
        ])
        .unwrap()
    }

    fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sums_multiplies_and_divides() {
        let df = sample();

        let sum = generate_column(&df, &targets(&["A", "B"]), "Sum", ColumnOperation::Sum).unwrap();
        assert_eq!(
            values(&sum, "Sum"),
            vec![Some(11.0), Some(22.0), Some(33.0), Some(44.0), Some(55.0)]
        );

        let mul = generate_column(&df, &targets(&["A", "C"]), "Mul", ColumnOperation::Multiply).unwrap();
        assert_eq!(
            values(&mul, "Mul"),
            vec![Some(2.0), Some(8.0), Some(6.0), Some(20.0), Some(50.0)]
        );

        let div = generate_column(&df, &targets(&["B", "C"]), "Div", ColumnOperation::Divide).unwrap();
        assert_eq!(
            values(&div, "Div"),
            vec![Some(5.0), Some(5.0), Some(15.0), Some(8.0), Some(5.0)]
        );
    }

    #[test]
    fn text_columns_are_coerced_with_zero_fallback() {
        let df = sample();
        let out = generate_column(&df, &targets(&["A", "D_str"]), "Mixed", ColumnOperation::Sum).unwrap();
        assert_eq!(
            values(&out, "Mixed"),
            vec![Some(2.5), Some(4.5), Some(3.0), Some(8.0), Some(10.5)]
        );
        // Source column keeps its original type.
        assert_eq!(out.column("D_str").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn zero_denominator_yields_null() {
        let df = sample();
        let out = generate_column(&df, &targets(&["B", "Z"]), "Ratio", ColumnOperation::Divide).unwrap();
        assert_eq!(
            values(&out, "Ratio"),
            vec![Some(10.0), None, Some(15.0), None, Some(12.5)]
        );
    }

    #[test]
    fn appends_new_column_last() {
        let df = sample();
        let out = generate_column(&df, &targets(&["A", "B", "C"]), "Total", ColumnOperation::Sum).unwrap();
        let names = out.get_column_names_str();
        assert_eq!(names, vec!["A", "B", "C", "D_str", "Z", "Total"]);
        assert_eq!(df.width(), 5);
    }

    #[test]
    fn rejects_contract_violations() {
        let df = sample();
        assert!(matches!(
            generate_column(&df, &[], "X", ColumnOperation::Sum),
            Err(ProfileError::EmptyTargetColumns)
        ));
        assert!(matches!(
            generate_column(&df, &targets(&["A"]), "B", ColumnOperation::Sum),
            Err(ProfileError::DuplicateColumn(name)) if name == "B"
        ));
        assert!(matches!(
            generate_column(&df, &targets(&["Q", "A", "P"]), "X", ColumnOperation::Sum),
            Err(ProfileError::MissingColumns(cols)) if cols == vec!["P", "Q"]
        ));
        assert!(matches!(
            generate_column(&df, &targets(&["A", "B", "C"]), "X", ColumnOperation::Divide),
            Err(ProfileError::DivideArity(3))
        ));
        assert!(matches!(
            "modulo".parse::<ColumnOperation>(),
            Err(ProfileError::UnsupportedOperation(op)) if op == "modulo"
        ));
        assert_eq!("divide".parse::<ColumnOperation>().unwrap(), ColumnOperation::Divide);
    }
}
