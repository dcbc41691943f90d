//! Progress events and the sinks that receive them.
//!
//! Components get an `Arc<dyn EventSink>` at construction and report what
//! they do through it. Nothing in the library installs a global logger; the
//! CLI decides how events are rendered.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::upload::UploadStrategy;

/// Something an operator may want to know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    RunStarted {
        run_id: String,
        entities: usize,
    },
    SourceConnected,
    SourceConnectFailed {
        error: String,
    },
    SourceClosed,
    FetchStarted {
        entity: String,
        table: String,
    },
    Fetched {
        entity: String,
        rows: usize,
    },
    FetchFailed {
        entity: String,
        error: String,
    },
    Validated {
        entity: String,
        accepted: usize,
        rejected: usize,
    },
    UploadStarted {
        entity: String,
        records: usize,
        strategy: UploadStrategy,
        batches: usize,
    },
    ClearSucceeded {
        entity: String,
    },
    ClearFailed {
        entity: String,
        error: String,
        fatal: bool,
    },
    BatchSent {
        entity: String,
        index: usize,
        total: usize,
        records: usize,
        message: Option<String>,
    },
    BatchFailed {
        entity: String,
        index: usize,
        total: usize,
        error: String,
    },
    UploadFinished {
        entity: String,
        success: bool,
        uploaded: usize,
    },
    EntitySkipped {
        entity: String,
        reason: String,
    },
    CriticalAbort {
        entity: String,
    },
    Cancelled,
    RunFinished {
        success: bool,
        uploaded: usize,
        duration_seconds: f64,
    },
}

/// Receiver of [`SyncEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SyncEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SyncEvent) {}
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SyncEvent) {
        match event {
            SyncEvent::RunStarted { run_id, entities } => {
                info!("Starting sync run {} ({} entities)", run_id, entities)
            }
            SyncEvent::SourceConnected => info!("Connected to source database"),
            SyncEvent::SourceConnectFailed { error } => {
                error!("Source connection failed: {}", error)
            }
            SyncEvent::SourceClosed => info!("Source connection closed"),
            SyncEvent::FetchStarted { entity, table } => {
                info!("{}: fetching from {}", entity, table)
            }
            SyncEvent::Fetched { entity, rows } => info!("{}: fetched {} rows", entity, rows),
            SyncEvent::FetchFailed { entity, error } => {
                warn!("{}: fetch failed, skipping: {}", entity, error)
            }
            SyncEvent::Validated {
                entity,
                accepted,
                rejected,
            } => {
                if *rejected > 0 {
                    warn!(
                        "{}: validated {} of {} rows ({} skipped)",
                        entity,
                        accepted,
                        accepted + rejected,
                        rejected
                    );
                } else {
                    info!("{}: validated {} rows", entity, accepted);
                }
            }
            SyncEvent::UploadStarted {
                entity,
                records,
                strategy,
                batches,
            } => info!(
                "{}: uploading {} records ({:?}, {} request(s))",
                entity, records, strategy, batches
            ),
            SyncEvent::ClearSucceeded { entity } => info!("{}: cleared remote data", entity),
            SyncEvent::ClearFailed {
                entity,
                error,
                fatal,
            } => {
                if *fatal {
                    error!("{}: clear failed, aborting upload: {}", entity, error);
                } else {
                    warn!("{}: clear failed, continuing: {}", entity, error);
                }
            }
            SyncEvent::BatchSent {
                entity,
                index,
                total,
                records,
                message,
            } => info!(
                "{}: batch {}/{} sent ({} records){}",
                entity,
                index + 1,
                total,
                records,
                message
                    .as_ref()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ),
            SyncEvent::BatchFailed {
                entity,
                index,
                total,
                error,
            } => error!("{}: batch {}/{} failed: {}", entity, index + 1, total, error),
            SyncEvent::UploadFinished {
                entity,
                success,
                uploaded,
            } => {
                if *success {
                    info!("{}: upload completed ({} records)", entity, uploaded);
                } else {
                    error!("{}: upload failed ({} records sent)", entity, uploaded);
                }
            }
            SyncEvent::EntitySkipped { entity, reason } => {
                info!("{}: skipped ({})", entity, reason)
            }
            SyncEvent::CriticalAbort { entity } => error!(
                "{}: critical entity failed, skipping remaining entities",
                entity
            ),
            SyncEvent::Cancelled => warn!("Sync cancelled"),
            SyncEvent::RunFinished {
                success,
                uploaded,
                duration_seconds,
            } => info!(
                "Sync {}: {} records uploaded in {:.1}s",
                if *success { "completed" } else { "failed" },
                uploaded,
                duration_seconds
            ),
        }
    }
}

/// Writes one JSON object per event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProgressSink;

impl EventSink for JsonProgressSink {
    fn emit(&self, event: &SyncEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
        }
    }
}

/// Forwards every event to each wrapped sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &SyncEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
