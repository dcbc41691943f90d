//! End-to-end sync run.
//!
//! A run opens the source once, then for every entity in order:
//! fetch, validate, upload. Fetch failures and non-critical upload failures
//! are recorded and the run moves on; a critical upload failure ends the
//! run. The source is closed exactly once per run, whatever the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::SuccessPolicy;
use crate::entity::{EntityKind, EntitySpec};
use crate::error::Result;
use crate::events::{EventSink, SyncEvent};
use crate::source::{DataSource, TableQuery};
use crate::transport::SyncTransport;
use crate::upload::{UploadOrchestrator, UploadStrategy};
use crate::validate::validate_all;

/// What happened to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Uploaded,
    /// Fetched and validated only.
    DryRun,
    FetchFailed,
    UploadFailed,
    /// Not attempted after a critical failure.
    Skipped,
    Cancelled,
}

impl EntityStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, EntityStatus::Uploaded | EntityStatus::DryRun)
    }
}

/// Per-entity counters and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub entity: EntityKind,
    pub table: String,
    pub critical: bool,
    pub status: EntityStatus,
    pub fetched: usize,
    pub validated: usize,
    pub rejected: usize,
    pub uploaded: usize,
    pub batches_sent: usize,
    pub batches_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<UploadStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityReport {
    fn new(entity: &EntitySpec, status: EntityStatus) -> Self {
        Self {
            entity: entity.kind,
            table: entity.table.clone(),
            critical: entity.critical,
            status,
            fetched: 0,
            validated: 0,
            rejected: 0,
            uploaded: 0,
            batches_sent: 0,
            batches_total: 0,
            strategy: None,
            error: None,
        }
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Result of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    pub success_policy: SuccessPolicy,

    pub dry_run: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Records acknowledged by the API across all entities.
    pub records_uploaded: usize,

    pub entities: Vec<EntityReport>,

    /// Critical entity whose upload failure ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<EntityKind>,

    /// Run-level error (source connection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.entity == kind)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Derive the run status from what happened.
///
/// Cancellation wins, then a failed connection or critical abort. Under
/// [`SuccessPolicy::AllEntities`] any entity that did not finish cleanly
/// also fails the run.
pub fn evaluate(
    policy: SuccessPolicy,
    cancelled: bool,
    connected: bool,
    aborted_by: Option<EntityKind>,
    entities: &[EntityReport],
) -> RunStatus {
    if cancelled {
        return RunStatus::Cancelled;
    }
    if !connected || aborted_by.is_some() {
        return RunStatus::Failed;
    }
    match policy {
        SuccessPolicy::CriticalOnly => RunStatus::Completed,
        SuccessPolicy::AllEntities => {
            if entities.iter().all(|e| e.status.is_ok()) {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            }
        }
    }
}

/// Sequential fetch -> validate -> upload over a list of entities.
pub struct SyncPipeline {
    source: Arc<dyn DataSource>,
    uploader: UploadOrchestrator,
    events: Arc<dyn EventSink>,
    policy: SuccessPolicy,
    dry_run: bool,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn DataSource>,
        transport: Arc<dyn SyncTransport>,
        events: Arc<dyn EventSink>,
        policy: SuccessPolicy,
    ) -> Self {
        Self {
            source,
            uploader: UploadOrchestrator::new(transport, events.clone()),
            events,
            policy,
            dry_run: false,
        }
    }

    /// Fetch and validate only; never call the transport.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the sync for `entities` in the given order.
    pub async fn run(&self, entities: &[EntitySpec], cancel: CancellationToken) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport {
            run_id: Uuid::new_v4().to_string(),
            status: RunStatus::Failed,
            success_policy: self.policy,
            dry_run: self.dry_run,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 0.0,
            records_uploaded: 0,
            entities: Vec::with_capacity(entities.len()),
            aborted_by: None,
            error: None,
        };

        self.events.emit(&SyncEvent::RunStarted {
            run_id: report.run_id.clone(),
            entities: entities.len(),
        });

        debug!("Connecting to {} source", self.source.source_type());
        let connected = match self.source.connect().await {
            Ok(()) => {
                self.events.emit(&SyncEvent::SourceConnected);
                true
            }
            Err(e) => {
                self.events.emit(&SyncEvent::SourceConnectFailed {
                    error: e.to_string(),
                });
                report.error = Some(e.to_string());
                false
            }
        };

        let mut cancelled = false;
        if connected {
            let mut remaining = entities.iter();
            for entity in remaining.by_ref() {
                if cancel.is_cancelled() {
                    cancelled = true;
                    report
                        .entities
                        .push(EntityReport::new(entity, EntityStatus::Cancelled));
                    break;
                }

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    r = self.sync_entity(entity) => Some(r),
                };

                let Some(entity_report) = result else {
                    cancelled = true;
                    report
                        .entities
                        .push(EntityReport::new(entity, EntityStatus::Cancelled));
                    break;
                };

                let critical_failure =
                    entity.critical && entity_report.status == EntityStatus::UploadFailed;
                report.entities.push(entity_report);

                if critical_failure {
                    report.aborted_by = Some(entity.kind);
                    self.events.emit(&SyncEvent::CriticalAbort {
                        entity: entity.name().to_string(),
                    });
                    break;
                }
            }

            let (status, reason) = if cancelled {
                (EntityStatus::Cancelled, "run cancelled".to_string())
            } else {
                let aborted = report.aborted_by.map(|k| k.name()).unwrap_or_default();
                (
                    EntityStatus::Skipped,
                    format!("critical entity {} failed", aborted),
                )
            };
            for entity in remaining {
                self.events.emit(&SyncEvent::EntitySkipped {
                    entity: entity.name().to_string(),
                    reason: reason.clone(),
                });
                report.entities.push(EntityReport::new(entity, status));
            }

            if cancelled {
                self.events.emit(&SyncEvent::Cancelled);
            }
        }

        // Called on every path, including a failed connect.
        self.source.close().await;
        if connected {
            self.events.emit(&SyncEvent::SourceClosed);
        }

        report.records_uploaded = report.entities.iter().map(|e| e.uploaded).sum();
        report.status = evaluate(
            self.policy,
            cancelled,
            connected,
            report.aborted_by,
            &report.entities,
        );
        report.completed_at = Utc::now();
        report.duration_seconds = start.elapsed().as_secs_f64();

        self.events.emit(&SyncEvent::RunFinished {
            success: report.success(),
            uploaded: report.records_uploaded,
            duration_seconds: report.duration_seconds,
        });

        report
    }

    async fn sync_entity(&self, entity: &EntitySpec) -> EntityReport {
        let mut report = EntityReport::new(entity, EntityStatus::Uploaded);

        self.events.emit(&SyncEvent::FetchStarted {
            entity: entity.name().to_string(),
            table: entity.table.clone(),
        });
        let rows = match self
            .source
            .fetch_rows(&TableQuery::for_entity(entity))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.events.emit(&SyncEvent::FetchFailed {
                    entity: entity.name().to_string(),
                    error: e.to_string(),
                });
                report.status = EntityStatus::FetchFailed;
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.fetched = rows.len();
        self.events.emit(&SyncEvent::Fetched {
            entity: entity.name().to_string(),
            rows: rows.len(),
        });

        let validator = entity.validator();
        let outcome = validate_all(entity.name(), &validator, rows);
        report.validated = outcome.records.len();
        report.rejected = outcome.rejected;
        self.events.emit(&SyncEvent::Validated {
            entity: entity.name().to_string(),
            accepted: outcome.records.len(),
            rejected: outcome.rejected,
        });

        if self.dry_run {
            report.status = EntityStatus::DryRun;
            return report;
        }

        let upload = self.uploader.upload(entity, &outcome.records).await;
        report.uploaded = upload.uploaded;
        report.batches_sent = upload.batches_sent;
        report.batches_total = upload.batches_total;
        report.strategy = Some(upload.strategy);
        report.error = upload.error;
        if !upload.success {
            report.status = EntityStatus::UploadFailed;
        }
        report
    }
}
