//! Source database access.
//!
//! The pipeline talks to the source only through [`DataSource`]: connect
//! once, fetch each entity's table, close once.

#[cfg(feature = "odbc")]
mod odbc;

#[cfg(feature = "odbc")]
pub use odbc::OdbcSource;

use async_trait::async_trait;

use crate::entity::EntitySpec;
use crate::error::Result;
use crate::record::RawRecord;

/// Trait for source database operations.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open the connection. Called once per run.
    async fn connect(&self) -> Result<()>;

    /// Read every row of a table. Rows are returned in source order.
    async fn fetch_rows(&self, query: &TableQuery) -> Result<Vec<RawRecord>>;

    /// Release the connection. Errors are logged, not returned.
    async fn close(&self);

    /// Get the source type, for logging.
    fn source_type(&self) -> &str;
}

/// Full-table read for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub entity: String,
    pub table: String,
    /// Columns to select. Empty means all columns.
    pub columns: Vec<String>,
}

impl TableQuery {
    pub fn for_entity(entity: &EntitySpec) -> Self {
        Self {
            entity: entity.name().to_string(),
            table: entity.table.clone(),
            columns: entity.columns().into_iter().map(str::to_string).collect(),
        }
    }

    /// `SELECT [a], [b] FROM [table]`, or `SELECT *` without columns.
    pub fn select_sql(&self) -> String {
        if self.columns.is_empty() {
            return self.select_all_sql();
        }
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_table(&self.table)
        )
    }

    pub fn select_all_sql(&self) -> String {
        format!("SELECT * FROM {}", quote_table(&self.table))
    }
}

/// Escape a SQL identifier for use in bracketed notation.
/// Doubles right brackets: `Table]Name` -> `Table]]Name`
fn escape_sql_ident(s: &str) -> String {
    s.replace(']', "]]")
}

fn quote_ident(s: &str) -> String {
    format!("[{}]", escape_sql_ident(s))
}

/// Quote a possibly schema-qualified table name part by part.
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}
