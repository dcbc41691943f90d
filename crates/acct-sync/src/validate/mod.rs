//! Per-record validation and normalization.
//!
//! Each entity declares a field schema ([`FieldSpec`] list). The
//! [`SchemaValidator`] walks that schema for every source row:
//!
//! - **Required** fields must be present and non-empty after trimming,
//!   otherwise the row is rejected.
//! - **Text** fields are trimmed; absent values become `""`.
//! - **Category** fields are trimmed; absent or empty values become NULL, so
//!   "no value" stays distinguishable from an empty string.
//! - **Integer**/**Decimal** fields are coerced; unparseable values become NULL.
//! - **Date** fields are parsed against [`DATE_FORMATS`] in order and emitted
//!   as ISO `YYYY-MM-DD`; unparseable values become NULL.
//!
//! Every step is idempotent, so validating an already clean record
//! (reinterpreted as a raw row) yields the same record.

mod parse;

use std::fmt;

use tracing::warn;

use crate::record::{CleanRecord, CleanValue, RawRecord};

pub use parse::{parse_date, parse_decimal, parse_integer, DATE_FORMATS};

/// How a single field is validated and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty trimmed string; missing means the row is rejected.
    Required,
    /// Free text; missing becomes an empty string.
    Text,
    /// Lookup/categorical value; missing becomes NULL.
    Category,
    /// Optional whole number.
    Integer,
    /// Optional decimal amount.
    Decimal,
    /// Optional date, normalized to ISO-8601.
    Date,
}

/// Mapping of one source column to one canonical output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Source column name.
    pub column: &'static str,
    /// Canonical field name in the API payload.
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(column: &'static str, name: &'static str, kind: FieldKind) -> Self {
        Self { column, name, kind }
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// First required field found missing.
    pub field: &'static str,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required field '{}'", self.field)
    }
}

/// Turns a raw source row into a clean record, or rejects it.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, raw: &RawRecord) -> Result<CleanRecord, Rejection>;
}

/// Validator driven by a static field schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    fields: &'static [FieldSpec],
}

impl SchemaValidator {
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }
}

impl RecordValidator for SchemaValidator {
    fn validate(&self, raw: &RawRecord) -> Result<CleanRecord, Rejection> {
        let mut clean = CleanRecord::with_capacity(self.fields.len());

        for field in self.fields {
            let value = raw.get(field.column);
            let trimmed = value
                .and_then(|v| v.as_text())
                .map(|s| s.trim().to_string());

            let cleaned = match field.kind {
                FieldKind::Required => match trimmed {
                    Some(s) if !s.is_empty() => CleanValue::Text(s),
                    _ => return Err(Rejection { field: field.name }),
                },
                FieldKind::Text => CleanValue::Text(trimmed.unwrap_or_default()),
                FieldKind::Category => match trimmed {
                    Some(s) if !s.is_empty() => CleanValue::Text(s),
                    _ => CleanValue::Null,
                },
                FieldKind::Integer => value
                    .and_then(parse_integer)
                    .map_or(CleanValue::Null, CleanValue::Integer),
                FieldKind::Decimal => value
                    .and_then(parse_decimal)
                    .map_or(CleanValue::Null, CleanValue::Decimal),
                FieldKind::Date => value.and_then(parse_date).map_or(CleanValue::Null, |d| {
                    CleanValue::Text(d.format("%Y-%m-%d").to_string())
                }),
            };

            clean.push(field.name, cleaned);
        }

        Ok(clean)
    }
}

/// Result of validating a whole fetch.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Accepted records, in input order.
    pub records: Vec<CleanRecord>,
    /// Number of dropped rows.
    pub rejected: usize,
}

/// Validate every row of a fetch. Rejected rows are omitted and counted.
pub fn validate_all(
    entity: &str,
    validator: &dyn RecordValidator,
    rows: Vec<RawRecord>,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome {
        records: Vec::with_capacity(rows.len()),
        rejected: 0,
    };

    for (index, row) in rows.into_iter().enumerate() {
        match validator.validate(&row) {
            Ok(record) => outcome.records.push(record),
            Err(rejection) => {
                warn!("{}: skipping row {}: {}", entity, index, rejection);
                outcome.rejected += 1;
            }
        }
    }

    outcome
}
