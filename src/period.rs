//! Period truncation and the canonical `YYYY-MM` labels used as pivot columns.
//!
//! Labels are fixed-width and zero-padded, so sorting them as strings gives
//! chronological order. Every period column in a wide table relies on this.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Calendar bucket each record is assigned to before pivoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationUnit {
    #[default]
    #[serde(alias = "1mo")]
    Month,
    #[serde(alias = "3mo", alias = "1q")]
    Quarter,
    #[serde(alias = "12mo", alias = "1y")]
    Year,
}

impl TruncationUnit {
    /// First day of the bucket containing `date`.
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        let month = match self {
            TruncationUnit::Month => date.month(),
            TruncationUnit::Quarter => (date.month0() / 3) * 3 + 1,
            TruncationUnit::Year => 1,
        };
        // Day 1 exists in every month.
        NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
    }

    pub fn period_of(self, date: NaiveDate) -> Period {
        Period::from_date(self.truncate(date))
    }
}

impl FromStr for TruncationUnit {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" | "mo" | "1mo" => Ok(TruncationUnit::Month),
            "quarter" | "q" | "1q" | "3mo" => Ok(TruncationUnit::Quarter),
            "year" | "y" | "1y" | "12mo" => Ok(TruncationUnit::Year),
            _ => Err(ProfileError::InvalidTruncationUnit(s.to_string())),
        }
    }
}

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The calendar month immediately after this one.
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProfileError::InvalidInput(format!("'{s}' is not a YYYY-MM period label"));
        if !is_period_label(s) {
            return Err(invalid());
        }
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

fn period_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}$").expect("valid period regex"))
}

/// True when `name` has the shape of a period column (`YYYY-MM`).
///
/// Keeps a joined-in rate or identifier column from being read as a month.
pub fn is_period_label(name: &str) -> bool {
    period_pattern().is_match(name)
}

/// Names of the period columns in `df`, sorted chronologically.
pub fn period_columns(df: &DataFrame) -> Vec<String> {
    let mut periods: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .filter(|name| is_period_label(name))
        .map(str::to_string)
        .collect();
    periods.sort();
    periods
}
