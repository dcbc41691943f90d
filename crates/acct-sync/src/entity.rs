//! Per-entity sync policy.
//!
//! Every synced table is described by an [`EntitySpec`]: where it comes from,
//! where it goes, how it is batched, how long each request may take and how
//! failures are treated. The built-in table below is the default policy;
//! [`Config`] can override most of it per entity.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::validate::{FieldKind, FieldSpec, SchemaValidator};

/// Timeout for single-shot uploads of small entities.
pub const SINGLE_SHOT_TIMEOUT: Duration = Duration::from_secs(300);

/// Logical synced table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// User accounts.
    Users,
    /// Primary master/reference accounts table.
    Master,
    /// Address and contact records.
    Directory,
    /// Ledger entries.
    Ledger,
}

impl EntityKind {
    /// Default processing order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Users,
        EntityKind::Master,
        EntityKind::Directory,
        EntityKind::Ledger,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Master => "master",
            EntityKind::Directory => "directory",
            EntityKind::Ledger => "ledger",
        }
    }

    /// Source column -> canonical field schema.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            EntityKind::Users => USER_FIELDS,
            EntityKind::Master => MASTER_FIELDS,
            EntityKind::Directory => DIRECTORY_FIELDS,
            EntityKind::Ledger => LEDGER_FIELDS,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "unknown entity '{}', expected one of: users, master, directory, ledger",
                    s
                ))
            })
    }
}

/// What to do about remote state before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    /// Never clear on the single-shot path. The batched path still clears
    /// and treats a failed clear as fatal.
    None,
    /// Clear, but log and continue when the clear fails.
    BestEffort,
    /// Clear, and abort the upload when the clear fails.
    Mandatory,
}

impl fmt::Display for ClearMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ClearMode::None => "none",
            ClearMode::BestEffort => "best_effort",
            ClearMode::Mandatory => "mandatory",
        })
    }
}

/// Per-batch deadline: a per-record cost clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub per_record: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimeoutPolicy {
    pub const fn new(per_record_ms: u64, min_secs: u64, max_secs: u64) -> Self {
        Self {
            per_record: Duration::from_millis(per_record_ms),
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Timeout for a request carrying `records` records, in whole seconds.
    pub fn for_records(&self, records: usize) -> Duration {
        let total_ms = self.per_record.as_millis().saturating_mul(records as u128);
        let secs = ((total_ms + 500) / 1000).min(u64::MAX as u128) as u64;
        Duration::from_secs(secs).clamp(self.min, self.max)
    }
}

/// Static descriptor for one synced table.
#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub kind: EntityKind,
    /// Source table name.
    pub table: String,
    /// API endpoint path, starting with `/`.
    pub endpoint: String,
    pub batch_size: NonZeroUsize,
    /// Record count at or above which the batched path is used.
    pub large_threshold: usize,
    /// Upload failure aborts the whole run.
    pub critical: bool,
    pub clear_mode: ClearMode,
    pub batch_timeout: TimeoutPolicy,
    pub single_shot_timeout: Duration,
    pub fields: &'static [FieldSpec],
}

/// Which configured batch size an entity uses.
#[derive(Debug, Clone, Copy)]
enum BatchClass {
    Default,
    Large,
}

struct BuiltinPolicy {
    table: &'static str,
    endpoint: &'static str,
    batch: BatchClass,
    critical: bool,
    clear_mode: ClearMode,
    batch_timeout: TimeoutPolicy,
}

fn builtin(kind: EntityKind) -> BuiltinPolicy {
    match kind {
        EntityKind::Users => BuiltinPolicy {
            table: "acc_users",
            endpoint: "/api/sync/users",
            batch: BatchClass::Default,
            critical: false,
            clear_mode: ClearMode::None,
            batch_timeout: TimeoutPolicy::new(50, 60, 180),
        },
        EntityKind::Master => BuiltinPolicy {
            table: "acc_master",
            endpoint: "/api/sync/master",
            batch: BatchClass::Large,
            critical: true,
            clear_mode: ClearMode::Mandatory,
            batch_timeout: TimeoutPolicy::new(100, 60, 180),
        },
        EntityKind::Directory => BuiltinPolicy {
            table: "acc_directory",
            endpoint: "/api/sync/directory",
            batch: BatchClass::Default,
            critical: false,
            clear_mode: ClearMode::BestEffort,
            batch_timeout: TimeoutPolicy::new(50, 60, 180),
        },
        // Heaviest table: widest timeout window.
        EntityKind::Ledger => BuiltinPolicy {
            table: "acc_ledger",
            endpoint: "/api/sync/ledger",
            batch: BatchClass::Large,
            critical: false,
            clear_mode: ClearMode::Mandatory,
            batch_timeout: TimeoutPolicy::new(120, 60, 240),
        },
    }
}

fn non_zero(value: usize, what: &str) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value)
        .ok_or_else(|| SyncError::Config(format!("{} must be at least 1", what)))
}

impl EntitySpec {
    /// Resolve one entity from the built-in policy plus config overrides.
    pub fn resolve(kind: EntityKind, config: &Config) -> Result<Self> {
        let policy = builtin(kind);
        let overrides = config.sync.entities.get(&kind).cloned().unwrap_or_default();

        let table = overrides
            .table
            .or_else(|| config.sync.tables.get(&kind).cloned())
            .unwrap_or_else(|| policy.table.to_string());

        let batch_size = match overrides.batch_size {
            Some(size) => size,
            None => match policy.batch {
                BatchClass::Default => config.sync.default_batch_size,
                BatchClass::Large => config.sync.large_table_batch_size,
            },
        };

        Ok(Self {
            kind,
            table,
            endpoint: overrides
                .endpoint
                .unwrap_or_else(|| policy.endpoint.to_string()),
            batch_size: non_zero(batch_size, &format!("{} batch size", kind))?,
            large_threshold: overrides
                .large_dataset_threshold
                .unwrap_or(config.sync.large_dataset_threshold),
            critical: overrides.critical.unwrap_or(policy.critical),
            clear_mode: overrides.clear_mode.unwrap_or(policy.clear_mode),
            batch_timeout: policy.batch_timeout,
            single_shot_timeout: SINGLE_SHOT_TIMEOUT,
            fields: kind.fields(),
        })
    }

    /// Resolve every enabled entity in configured order.
    pub fn resolve_all(config: &Config) -> Result<Vec<Self>> {
        config
            .sync
            .order
            .iter()
            .filter(|kind| {
                config
                    .sync
                    .entities
                    .get(kind)
                    .and_then(|o| o.enabled)
                    .unwrap_or(true)
            })
            .map(|kind| Self::resolve(*kind, config))
            .collect()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Source columns to select, in schema order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.column).collect()
    }

    /// Whether `count` records take the batched path.
    pub fn is_large(&self, count: usize) -> bool {
        count >= self.large_threshold
    }

    pub fn validator(&self) -> SchemaValidator {
        SchemaValidator::new(self.fields)
    }
}

const USER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("id", "id", FieldKind::Required),
    FieldSpec::new("pass", "pass", FieldKind::Required),
    FieldSpec::new("role", "role", FieldKind::Category),
    FieldSpec::new("accountcode", "accountcode", FieldKind::Category),
];

const MASTER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("code", "code", FieldKind::Required),
    FieldSpec::new("name", "name", FieldKind::Text),
    FieldSpec::new("group_code", "group_code", FieldKind::Category),
    FieldSpec::new("opening_balance", "opening_balance", FieldKind::Decimal),
    FieldSpec::new("closing_balance", "closing_balance", FieldKind::Decimal),
    FieldSpec::new("updated_on", "updated_on", FieldKind::Date),
];

const DIRECTORY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", "name", FieldKind::Required),
    FieldSpec::new("code", "code", FieldKind::Category),
    FieldSpec::new("address", "address", FieldKind::Text),
    FieldSpec::new("city", "city", FieldKind::Text),
    FieldSpec::new("phone", "phone", FieldKind::Text),
    FieldSpec::new("email", "email", FieldKind::Text),
    FieldSpec::new("category", "category", FieldKind::Category),
    FieldSpec::new("credit_limit", "credit_limit", FieldKind::Decimal),
    FieldSpec::new("created_on", "created_on", FieldKind::Date),
];

const LEDGER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("code", "code", FieldKind::Required),
    FieldSpec::new("entry_date", "entry_date", FieldKind::Date),
    FieldSpec::new("voucher_type", "voucher_type", FieldKind::Category),
    FieldSpec::new("voucher_no", "voucher_no", FieldKind::Integer),
    FieldSpec::new("debit", "debit", FieldKind::Decimal),
    FieldSpec::new("credit", "credit", FieldKind::Decimal),
    FieldSpec::new("narration", "narration", FieldKind::Text),
];
