//! Rate strings such as `"52ftp/w"` or `"60 m / mo"`, normalized to an SI
//! unit per month.
//!
//! Normalization is best effort: anything that cannot be parsed or converted
//! comes back as the original string.

use std::fmt;
use std::sync::OnceLock;

use polars::prelude::*;
use regex::Regex;
use tracing::{debug, info, warn};
use uom::si::f64::{Area, Length, Mass, Volume};
use uom::si::{area, length, mass, volume};

use crate::error::{ProfileError, Result};

/// Periods-per-month multipliers. These approximations are part of the
/// output format and must not be replaced by calendar-exact values.
pub const WEEKS_PER_MONTH: f64 = 4.33;
pub const DAYS_PER_MONTH: f64 = 30.44;
pub const YEARS_PER_MONTH: f64 = 1.0 / 12.0;

/// Components of a `<number><unit>/<period>` string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRate {
    pub value: f64,
    pub unit: String,
    pub period: String,
}

/// Outcome of parsing a rate string.
#[derive(Debug, Clone, PartialEq)]
pub enum RateParse {
    Parsed(ParsedRate),
    Unparsed(String),
}

/// A rate expressed in an SI unit per month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyRate {
    pub value: f64,
    pub unit: &'static str,
}

impl fmt::Display for MonthlyRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}{}/mo", self.value, self.unit)
    }
}

fn rate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([\d.]+)\s*([a-zA-Z]+[23]?)\s*/\s*([a-zA-Z]+)$").expect("valid rate regex")
    })
}

/// Split a rate string into value, unit and period tokens.
pub fn parse_rate(raw: &str) -> RateParse {
    let trimmed = raw.trim();
    let Some(caps) = rate_pattern().captures(trimmed) else {
        warn!("Could not parse rate string: '{raw}'");
        return RateParse::Unparsed(raw.to_string());
    };

    let Ok(value) = caps[1].parse::<f64>() else {
        warn!("Could not convert rate value to float: '{}'", &caps[1]);
        return RateParse::Unparsed(raw.to_string());
    };

    RateParse::Parsed(ParsedRate {
        value,
        unit: caps[2].to_string(),
        period: caps[3].to_string(),
    })
}

/// A recognized unit token, read as a `uom` quantity of its family.
enum Quantity {
    Length(Length),
    Volume(Volume),
    Mass(Mass),
    Area(Area),
}

fn length_of(value: f64, unit: &str) -> Option<Length> {
    let q = match unit {
        "m" | "meter" | "meters" | "metre" | "metres" => Length::new::<length::meter>(value),
        "ft" | "ftp" | "foot" | "feet" => Length::new::<length::foot>(value),
        "dm" | "decimeter" | "decimetre" => Length::new::<length::decimeter>(value),
        "cm" | "centimeter" | "centimetre" => Length::new::<length::centimeter>(value),
        "mm" | "millimeter" | "millimetre" => Length::new::<length::millimeter>(value),
        "km" | "kilometer" | "kilometre" => Length::new::<length::kilometer>(value),
        "in" | "inch" | "inches" => Length::new::<length::inch>(value),
        "yd" | "yard" | "yards" => Length::new::<length::yard>(value),
        "mi" | "mile" | "miles" => Length::new::<length::mile>(value),
        "fathom" | "fathoms" => Length::new::<length::fathom>(value),
        "chain" | "chains" => Length::new::<length::chain>(value),
        _ => return None,
    };
    Some(q)
}

fn volume_of(value: f64, unit: &str) -> Option<Volume> {
    let q = match unit {
        "l" | "liter" | "liters" | "litre" | "litres" => Volume::new::<volume::liter>(value),
        "ml" | "milliliter" | "millilitre" => Volume::new::<volume::milliliter>(value),
        "kl" | "kiloliter" | "kilolitre" => Volume::new::<volume::kiloliter>(value),
        "megaliter" | "megalitre" => Volume::new::<volume::megaliter>(value),
        "gal" | "gallon" | "gallons" => Volume::new::<volume::gallon>(value),
        "impgal" | "gallon_imperial" => Volume::new::<volume::gallon_imperial>(value),
        "bbl" | "barrel" | "barrels" => Volume::new::<volume::barrel>(value),
        // Bank and loose cubic meters are both plain volume.
        "m3" | "cum" | "bcm" | "lcm" => Volume::new::<volume::cubic_meter>(value),
        "cm3" | "cc" => Volume::new::<volume::cubic_centimeter>(value),
        "km3" => Volume::new::<volume::cubic_kilometer>(value),
        "ft3" | "cuft" | "cf" => Volume::new::<volume::cubic_foot>(value),
        "yd3" | "cuyd" | "cy" | "bcy" | "lcy" => Volume::new::<volume::cubic_yard>(value),
        "in3" | "cuin" => Volume::new::<volume::cubic_inch>(value),
        "acft" | "acre_foot" => Volume::new::<volume::acre_foot>(value),
        _ => return None,
    };
    Some(q)
}

fn mass_of(value: f64, unit: &str) -> Option<Mass> {
    let q = match unit {
        // Wet and dry metric tons share the base unit.
        "t" | "mt" | "wmt" | "dmt" | "tonne" | "tonnes" => Mass::new::<mass::ton>(value),
        "kt" | "kilotonne" | "kilotonnes" => Mass::new::<mass::gigagram>(value),
        "kg" | "kilogram" | "kilograms" => Mass::new::<mass::kilogram>(value),
        "g" | "gram" | "grams" => Mass::new::<mass::gram>(value),
        "mg" | "milligram" | "milligrams" => Mass::new::<mass::milligram>(value),
        "lb" | "lbs" | "pound" | "pounds" => Mass::new::<mass::pound>(value),
        "oz" | "ounce" | "ounces" => Mass::new::<mass::ounce>(value),
        "ozt" | "troy_ounce" | "ounce_troy" => Mass::new::<mass::ounce_troy>(value),
        "ton" | "tons" | "st" | "short_ton" => Mass::new::<mass::ton_short>(value),
        "lt" | "long_ton" => Mass::new::<mass::ton_long>(value),
        _ => return None,
    };
    Some(q)
}

fn area_of(value: f64, unit: &str) -> Option<Area> {
    let q = match unit {
        "m2" | "sqm" => Area::new::<area::square_meter>(value),
        "km2" => Area::new::<area::square_kilometer>(value),
        "ft2" | "sqft" => Area::new::<area::square_foot>(value),
        "yd2" | "sqyd" => Area::new::<area::square_yard>(value),
        "in2" | "sqin" => Area::new::<area::square_inch>(value),
        "mi2" | "sqmi" => Area::new::<area::square_mile>(value),
        "ha" | "hectare" | "hectares" => Area::new::<area::hectare>(value),
        "acre" | "acres" => Area::new::<area::acre>(value),
        _ => return None,
    };
    Some(q)
}

fn quantity_of(value: f64, unit: &str) -> Option<Quantity> {
    let unit = unit.to_ascii_lowercase();
    length_of(value, &unit)
        .map(Quantity::Length)
        .or_else(|| volume_of(value, &unit).map(Quantity::Volume))
        .or_else(|| mass_of(value, &unit).map(Quantity::Mass))
        .or_else(|| area_of(value, &unit).map(Quantity::Area))
}

/// Convert `value` in `unit` to the SI unit of its dimensional family.
///
/// Length goes to meters, volume to liters, mass to kilograms. Area has no
/// curated preference and goes to the SI base unit. Unknown units yield
/// `None`.
pub fn convert_unit_to_si(value: f64, unit: &str) -> Option<(f64, &'static str)> {
    let converted = match quantity_of(value, unit)? {
        Quantity::Length(q) => (q.get::<length::meter>(), "meter"),
        Quantity::Volume(q) => (q.get::<volume::liter>(), "liter"),
        Quantity::Mass(q) => (q.get::<mass::kilogram>(), "kilogram"),
        Quantity::Area(q) => (q.get::<area::square_meter>(), "meter²"),
    };
    Some(converted)
}

/// Number of `period` units in one month. Unknown tokens count as monthly.
pub fn periods_per_month(period: &str) -> f64 {
    match period.to_ascii_lowercase().as_str() {
        "week" | "weeks" | "wk" | "w" => WEEKS_PER_MONTH,
        "day" | "days" | "d" => DAYS_PER_MONTH,
        "year" | "years" | "yr" | "y" => YEARS_PER_MONTH,
        // In a rate denominator "m" is a month, not a meter.
        "month" | "months" | "mo" | "m" => 1.0,
        other => {
            warn!("Unknown time period '{other}'. Assuming monthly.");
            1.0
        }
    }
}

/// Express a parsed rate in SI units per month.
pub fn to_monthly_si(rate: &ParsedRate) -> Option<MonthlyRate> {
    let Some((si_value, unit)) = convert_unit_to_si(rate.value, &rate.unit) else {
        warn!("Could not convert unit '{}' to SI", rate.unit);
        return None;
    };
    Some(MonthlyRate {
        value: si_value * periods_per_month(&rate.period),
        unit,
    })
}

/// Normalize a rate string to `"<value:.2><si unit>/mo"`, or return it
/// unchanged when any step fails.
pub fn normalize_rate(raw: &str) -> String {
    let normalized = match parse_rate(raw) {
        RateParse::Parsed(parsed) => to_monthly_si(&parsed).map(|m| m.to_string()),
        RateParse::Unparsed(_) => None,
    };
    match normalized {
        Some(result) => {
            debug!("Converted '{raw}' -> '{result}'");
            result
        }
        None => raw.to_string(),
    }
}

/// Append a column holding the normalized form of every rate in
/// `rate_column`. Nulls stay null; non-text values pass through as text.
pub fn add_si_rate_column(df: &DataFrame, rate_column: &str, new_column: &str) -> Result<DataFrame> {
    let rates = df
        .column(rate_column)
        .map_err(|_| ProfileError::missing([rate_column]))?
        .cast(&DataType::String)?;

    info!("Converting rates in column '{rate_column}' to monthly SI units");

    let normalized: Vec<Option<String>> = rates
        .str()?
        .into_iter()
        .map(|value| value.map(normalize_rate))
        .collect();

    let mut out = df.clone();
    out.with_column(Column::new(new_column.into(), normalized))?;
    info!("Added column '{new_column}'");
    Ok(out)
}
