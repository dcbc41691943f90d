//! # acct-sync
//!
//! Batch synchronization of an accounting database to a remote HTTP API.
//!
//! Each run reads a fixed set of tables over ODBC, cleans every row against a
//! declarative per-entity schema and posts the result as JSON:
//!
//! - **Per-entity policy** (table, endpoint, batch size, criticality, clear
//!   mode, timeouts)
//! - **Single-shot or batched uploads** with remote clear and append flags
//! - **Status-based retries** with exponential backoff
//! - **Fail-fast** on critical entities, isolation for the rest
//! - **Injected event sinks** for progress reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acct_sync::{Config, EntitySpec, HttpTransport, SyncPipeline, TracingSink};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(source: Arc<dyn acct_sync::DataSource>) -> acct_sync::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let entities = EntitySpec::resolve_all(&config)?;
//! let transport = Arc::new(HttpTransport::new(&config.api)?);
//! let pipeline = SyncPipeline::new(
//!     source,
//!     transport,
//!     Arc::new(TracingSink),
//!     config.sync.success_policy,
//! );
//! let report = pipeline.run(&entities, CancellationToken::new()).await;
//! println!("Uploaded {} records", report.records_uploaded);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod transport;
pub mod upload;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use batch::{partition, Batch};
pub use config::{ApiConfig, Config, SourceConfig, SuccessPolicy, SyncSettings};
pub use entity::{ClearMode, EntityKind, EntitySpec, TimeoutPolicy};
pub use error::{Result, SyncError};
pub use events::{EventSink, FanoutSink, JsonProgressSink, NullSink, SyncEvent, TracingSink};
pub use pipeline::{EntityReport, EntityStatus, RunStatus, SyncPipeline, SyncReport};
pub use record::{CleanRecord, CleanValue, RawRecord, RawValue};
pub use source::{DataSource, TableQuery};
pub use transport::{Delivery, HttpTransport, RetryPolicy, SyncTransport};
pub use upload::{UploadOrchestrator, UploadOutcome, UploadStrategy};
pub use validate::{validate_all, RecordValidator, SchemaValidator, ValidationOutcome};

#[cfg(feature = "odbc")]
pub use source::OdbcSource;
