//! Upload orchestration for one entity.
//!
//! Small record sets go out in one request. Sets at or above the entity's
//! large threshold are cleared remotely first and then sent in sequential
//! batches; the first failed batch ends the upload.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::batch::{partition, Batch};
use crate::entity::{ClearMode, EntitySpec};
use crate::events::{EventSink, SyncEvent};
use crate::record::CleanRecord;
use crate::transport::SyncTransport;

/// How an entity's records were sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// One request holding every record.
    SingleShot,
    /// Clear, then ordered batches.
    Batched,
}

/// Result of uploading one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    /// Records in successfully acknowledged requests only.
    pub uploaded: usize,
    pub batches_sent: usize,
    pub batches_total: usize,
    pub strategy: UploadStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    fn new(strategy: UploadStrategy, batches_total: usize) -> Self {
        Self {
            success: false,
            uploaded: 0,
            batches_sent: 0,
            batches_total,
            strategy,
            error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Drives the transport for one entity at a time.
pub struct UploadOrchestrator {
    transport: Arc<dyn SyncTransport>,
    events: Arc<dyn EventSink>,
}

impl UploadOrchestrator {
    pub fn new(transport: Arc<dyn SyncTransport>, events: Arc<dyn EventSink>) -> Self {
        Self { transport, events }
    }

    /// Upload `records` for `entity`.
    ///
    /// Never panics or returns early with an error; the outcome says what
    /// happened and how many records the API acknowledged.
    pub async fn upload(&self, entity: &EntitySpec, records: &[CleanRecord]) -> UploadOutcome {
        if records.is_empty() {
            debug!("{}: nothing to upload", entity.name());
            let mut outcome = UploadOutcome::new(UploadStrategy::SingleShot, 0);
            outcome.success = true;
            self.finish(entity, &outcome);
            return outcome;
        }

        let outcome = if entity.is_large(records.len()) {
            self.upload_batched(entity, records).await
        } else {
            self.upload_single(entity, records).await
        };
        self.finish(entity, &outcome);
        outcome
    }

    async fn upload_single(&self, entity: &EntitySpec, records: &[CleanRecord]) -> UploadOutcome {
        let mut outcome = UploadOutcome::new(UploadStrategy::SingleShot, 1);
        self.events.emit(&SyncEvent::UploadStarted {
            entity: entity.name().to_string(),
            records: records.len(),
            strategy: UploadStrategy::SingleShot,
            batches: 1,
        });

        match entity.clear_mode {
            ClearMode::None => {}
            ClearMode::BestEffort => {
                let _ = self.clear(entity, false).await;
            }
            ClearMode::Mandatory => {
                if let Err(e) = self.clear(entity, true).await {
                    return outcome.failed(e);
                }
            }
        }

        let batch = Batch::whole(records);
        match self
            .send(entity, &batch, true, entity.single_shot_timeout)
            .await
        {
            Ok(()) => {
                outcome.success = true;
                outcome.uploaded = records.len();
                outcome.batches_sent = 1;
                outcome
            }
            Err(e) => outcome.failed(e),
        }
    }

    async fn upload_batched(&self, entity: &EntitySpec, records: &[CleanRecord]) -> UploadOutcome {
        let batches = partition(records, entity.batch_size);
        let mut outcome = UploadOutcome::new(UploadStrategy::Batched, batches.len());
        self.events.emit(&SyncEvent::UploadStarted {
            entity: entity.name().to_string(),
            records: records.len(),
            strategy: UploadStrategy::Batched,
            batches: batches.len(),
        });

        let clear_fatal = entity.clear_mode != ClearMode::BestEffort;
        if let Err(e) = self.clear(entity, clear_fatal).await {
            if clear_fatal {
                return outcome.failed(e);
            }
        }

        for batch in &batches {
            let timeout = entity.batch_timeout.for_records(batch.len());
            if let Err(e) = self.send(entity, batch, batch.is_first(), timeout).await {
                return outcome.failed(e);
            }
            outcome.uploaded += batch.len();
            outcome.batches_sent += 1;
        }

        outcome.success = true;
        outcome
    }

    /// Clear remote data, reporting the result. Returns the error text on
    /// failure.
    async fn clear(&self, entity: &EntitySpec, fatal: bool) -> Result<(), String> {
        match self.transport.clear_remote(entity).await {
            Ok(_) => {
                self.events.emit(&SyncEvent::ClearSucceeded {
                    entity: entity.name().to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                self.events.emit(&SyncEvent::ClearFailed {
                    entity: entity.name().to_string(),
                    error: error.clone(),
                    fatal,
                });
                Err(error)
            }
        }
    }

    async fn send(
        &self,
        entity: &EntitySpec,
        batch: &Batch<'_>,
        is_first: bool,
        timeout: Duration,
    ) -> Result<(), String> {
        match self
            .transport
            .send_batch(entity, batch, is_first, timeout)
            .await
        {
            Ok(delivery) => {
                self.events.emit(&SyncEvent::BatchSent {
                    entity: entity.name().to_string(),
                    index: batch.index,
                    total: batch.total,
                    records: batch.len(),
                    message: delivery.message,
                });
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                self.events.emit(&SyncEvent::BatchFailed {
                    entity: entity.name().to_string(),
                    index: batch.index,
                    total: batch.total,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn finish(&self, entity: &EntitySpec, outcome: &UploadOutcome) {
        self.events.emit(&SyncEvent::UploadFinished {
            entity: entity.name().to_string(),
            success: outcome.success,
            uploaded: outcome.uploaded,
        });
    }
}
