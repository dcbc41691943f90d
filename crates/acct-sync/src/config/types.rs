//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::{ClearMode, EntityKind};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database (ODBC) configuration.
    pub source: SourceConfig,

    /// Destination API configuration.
    pub api: ApiConfig,

    /// Sync behavior configuration.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source database (ODBC) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// ODBC data source name.
    #[serde(default)]
    pub dsn: String,

    /// Username.
    #[serde(default)]
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Login timeout in seconds (default: 10).
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u32,

    /// Full ODBC connection string. Takes precedence over dsn/username/password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("dsn", &self.dsn)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Destination API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://sync.example.com`.
    pub base_url: String,

    /// Per-client identifier sent as `client_id` on every request.
    pub client_id: String,

    /// Default per-request timeout in seconds (default: 30).
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,

    /// Retries on a retryable status after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff factor in seconds (default: 1.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor_secs: f64,

    /// Response statuses that trigger a retry.
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,

    /// User-Agent header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Batch size for regular entities (default: 500).
    pub default_batch_size: usize,

    /// Batch size for heavy entities (default: 200).
    pub large_table_batch_size: usize,

    /// Record count at or above which the batched path is used (default: 1000).
    pub large_dataset_threshold: usize,

    /// How per-entity failures fold into the overall result.
    pub success_policy: SuccessPolicy,

    /// Processing order. Entities not listed are not synced.
    pub order: Vec<EntityKind>,

    /// Source table name overrides.
    pub tables: BTreeMap<EntityKind, String>,

    /// Per-entity policy overrides.
    pub entities: BTreeMap<EntityKind, EntityOverride>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            large_table_batch_size: default_large_table_batch_size(),
            large_dataset_threshold: default_large_dataset_threshold(),
            success_policy: SuccessPolicy::default(),
            order: EntityKind::ALL.to_vec(),
            tables: BTreeMap::new(),
            entities: BTreeMap::new(),
        }
    }
}

/// Optional per-entity overrides. Unset fields keep the built-in policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_dataset_threshold: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_mode: Option<ClearMode>,
}

/// How the overall run result is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Fail only on connection failure, critical-entity upload failure or
    /// cancellation. Other entity failures are logged.
    #[default]
    CriticalOnly,

    /// Any fetch or upload failure fails the run.
    AllEntities,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error). CLI --verbosity wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for per-run `sync_YYYYMMDD_HHMMSS.log` files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

// Default value functions for serde
fn default_login_timeout() -> u32 {
    10
}

fn default_api_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_user_agent() -> String {
    format!("acct-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_batch_size() -> usize {
    500
}

fn default_large_table_batch_size() -> usize {
    200
}

fn default_large_dataset_threshold() -> usize {
    1000
}
