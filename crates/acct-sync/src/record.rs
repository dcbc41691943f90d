//! Row value types flowing from the source to the API.
//!
//! A [`RawRecord`] is one source row keyed by source column name. The
//! validator turns it into a [`CleanRecord`] keyed by canonical field name,
//! which is the unit serialized into batches.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::Serialize;

/// Scalar value as produced by the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl RawValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Render the value as text, the way a string coercion would.
    ///
    /// Returns `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Integer(v) => Some(v.to_string()),
            RawValue::Float(v) => Some(v.to_string()),
            RawValue::Decimal(v) => Some(v.normalize().to_string()),
            RawValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            RawValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawValue::Null)
    }
}

/// One source row: column name -> value, in result-set order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    columns: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Insert or replace a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<RawValue>) {
        let column = column.into();
        let value = value.into();
        match self
            .columns
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Look up a column. Source column names are matched case-insensitively,
    /// since ODBC drivers differ in the case they report.
    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Normalized scalar ready for JSON encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
}

impl CleanValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CleanValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CleanValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CleanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanValue::Null => write!(f, "null"),
            CleanValue::Text(s) => write!(f, "{}", s),
            CleanValue::Integer(v) => write!(f, "{}", v),
            CleanValue::Decimal(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for CleanValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CleanValue::Null => serializer.serialize_none(),
            CleanValue::Text(s) => serializer.serialize_str(s),
            CleanValue::Integer(v) => serializer.serialize_i64(*v),
            // Exact decimal text as a JSON number; never via f64.
            CleanValue::Decimal(v) => serde_json::Number::from_str(&v.normalize().to_string())
                .map_err(S::Error::custom)?
                .serialize(serializer),
        }
    }
}

impl From<&CleanValue> for RawValue {
    fn from(value: &CleanValue) -> Self {
        match value {
            CleanValue::Null => RawValue::Null,
            CleanValue::Text(s) => RawValue::Text(s.clone()),
            CleanValue::Integer(v) => RawValue::Integer(*v),
            CleanValue::Decimal(v) => RawValue::Decimal(*v),
        }
    }
}

/// Validated record: canonical field name -> normalized value.
///
/// Field order is the entity schema order and is kept when serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanRecord {
    fields: Vec<(String, CleanValue)>,
}

impl CleanRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: CleanValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&CleanValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CleanValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reinterpret this record as a source row keyed by canonical names.
    pub fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new();
        for (name, value) in &self.fields {
            raw.insert(name.clone(), RawValue::from(value));
        }
        raw
    }
}

impl Serialize for CleanRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
