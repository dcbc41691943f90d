//! Scalar coercions used by the validator.
//!
//! All parsers return `None` when the value is NULL or cannot be coerced;
//! the caller maps that to a NULL field.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::record::RawValue;

/// Accepted date formats, tried in order. First match wins.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d"];

/// Timestamp layouts that are truncated to their date part.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Strip whitespace and thousands separators from a numeric string.
fn numeric_text(s: &str) -> String {
    s.trim().chars().filter(|c| *c != ',').collect()
}

/// Coerce a value to a whole number.
///
/// Fractional values are not truncated; they yield `None`.
pub fn parse_integer(value: &RawValue) -> Option<i64> {
    match value {
        RawValue::Integer(v) => Some(*v),
        RawValue::Float(f) if f.is_finite() && f.fract() == 0.0 => f.to_i64(),
        RawValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        RawValue::Text(s) => {
            let s = numeric_text(s);
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>().ok().or_else(|| {
                Decimal::from_str(&s)
                    .ok()
                    .filter(|d| d.fract().is_zero())
                    .and_then(|d| d.to_i64())
            })
        }
        _ => None,
    }
}

/// Coerce a value to a decimal amount.
pub fn parse_decimal(value: &RawValue) -> Option<Decimal> {
    match value {
        RawValue::Integer(v) => Some(Decimal::from(*v)),
        RawValue::Float(f) if f.is_finite() => Decimal::from_f64(*f),
        RawValue::Decimal(d) => Some(*d),
        RawValue::Text(s) => {
            let s = numeric_text(s);
            if s.is_empty() {
                return None;
            }
            Decimal::from_str(&s)
                .ok()
                .or_else(|| Decimal::from_scientific(&s).ok())
        }
        _ => None,
    }
}

/// Parse a date using [`DATE_FORMATS`], falling back to timestamp layouts.
pub fn parse_date(value: &RawValue) -> Option<NaiveDate> {
    match value {
        RawValue::Date(d) => Some(*d),
        RawValue::DateTime(dt) => Some(dt.date()),
        RawValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    DATETIME_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|dt| dt.date())
                })
        }
        _ => None,
    }
}
