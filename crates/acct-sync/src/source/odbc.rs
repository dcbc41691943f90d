//! ODBC source for the accounting database.
//!
//! **Requirements:**
//! - The `odbc` feature must be enabled
//! - An ODBC driver manager (unixODBC on Linux/macOS) and a configured DSN
//!   for the accounting database
//!
//! A single connection is opened by [`DataSource::connect`] and reused for
//! every table until [`DataSource::close`] drops it.

use std::sync::OnceLock;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{Result, SyncError};
use crate::record::{RawRecord, RawValue};
use crate::source::{DataSource, TableQuery};

/// Rows fetched per ODBC round trip.
const FETCH_ROWS: usize = 1000;

/// Upper bound for a single text cell.
const MAX_TEXT_LEN: usize = 4096;

/// Process-wide ODBC environment. Connections borrow from it, so it must
/// outlive them.
fn environment() -> Result<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();

    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        SyncError::Source(format!(
            "Failed to create ODBC environment: {}. \
             Make sure an ODBC driver manager is installed (Linux: apt install unixodbc).",
            e
        ))
    })?;
    Ok(ENV.get_or_init(|| env))
}

/// ODBC-backed [`DataSource`].
pub struct OdbcSource {
    connection_string: String,
    login_timeout_secs: u32,
    dsn: String,
    /// ODBC is not thread-safe; every statement runs under this lock.
    conn: Mutex<Option<Connection<'static>>>,
}

impl OdbcSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            connection_string: config.connection_string(),
            login_timeout_secs: config.login_timeout_secs,
            dsn: config.dsn.clone(),
            conn: Mutex::new(None),
        }
    }

    /// Run `sql` and collect rows keyed by result column name.
    fn query(conn: &Connection<'static>, sql: &str) -> std::result::Result<Vec<RawRecord>, String> {
        let mut rows = Vec::new();

        let Some(mut cursor) = conn
            .execute(sql, ())
            .map_err(|e| format!("query failed: {} - SQL: {}", e, sql))?
        else {
            return Ok(rows);
        };

        let names: Vec<String> = cursor
            .column_names()
            .map_err(|e| format!("failed to read column names: {}", e))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("failed to read column names: {}", e))?;

        let mut buffers = TextRowSet::for_cursor(FETCH_ROWS, &mut cursor, Some(MAX_TEXT_LEN))
            .map_err(|e| format!("failed to create row buffer: {}", e))?;

        let mut row_cursor = cursor
            .bind_buffer(&mut buffers)
            .map_err(|e| format!("failed to bind buffer: {}", e))?;

        while let Some(batch) = row_cursor
            .fetch()
            .map_err(|e| format!("failed to fetch rows: {}", e))?
        {
            for row_idx in 0..batch.num_rows() {
                let mut record = RawRecord::new();
                for (col_idx, name) in names.iter().enumerate() {
                    let value = match batch.at(col_idx, row_idx) {
                        Some(bytes) => {
                            RawValue::Text(String::from_utf8_lossy(bytes).trim().to_string())
                        }
                        None => RawValue::Null,
                    };
                    record.insert(name.as_str(), value);
                }
                rows.push(record);
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl DataSource for OdbcSource {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let env = environment()?;
        let options = ConnectionOptions {
            login_timeout_sec: Some(self.login_timeout_secs),
            ..ConnectionOptions::default()
        };

        debug!(
            "ODBC connection string (credentials hidden): DSN={};...",
            self.dsn
        );

        let conn = env
            .connect_with_connection_string(&self.connection_string, options)
            .map_err(|e| {
                SyncError::Source(format!(
                    "Failed to connect via ODBC (DSN {}): {}. \
                     Check that the DSN exists and the credentials are correct.",
                    self.dsn, e
                ))
            })?;

        info!("Connected to source via ODBC: DSN {}", self.dsn);
        *guard = Some(conn);
        Ok(())
    }

    async fn fetch_rows(&self, query: &TableQuery) -> Result<Vec<RawRecord>> {
        let guard = self.conn.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| SyncError::fetch(&query.entity, "source is not connected"))?;

        match Self::query(conn, &query.select_sql()) {
            Ok(rows) => Ok(rows),
            Err(e) if !query.columns.is_empty() => {
                warn!(
                    "{}: column query failed, retrying with SELECT *: {}",
                    query.entity, e
                );
                Self::query(conn, &query.select_all_sql())
                    .map_err(|e| SyncError::fetch(&query.entity, e))
            }
            Err(e) => Err(SyncError::fetch(&query.entity, e)),
        }
    }

    async fn close(&self) {
        // Dropping the connection disconnects it.
        if let Some(conn) = self.conn.lock().await.take() {
            drop(conn);
            info!("Source connection closed");
        }
    }

    fn source_type(&self) -> &str {
        "odbc"
    }
}
