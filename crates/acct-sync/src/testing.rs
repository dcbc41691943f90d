//! In-memory doubles for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::batch::Batch;
use crate::entity::{EntityKind, EntitySpec};
use crate::error::{Result, SyncError};
use crate::events::{EventSink, SyncEvent};
use crate::record::RawRecord;
use crate::source::{DataSource, TableQuery};
use crate::transport::{Delivery, SyncTransport};

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// One transport call as seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Clear(EntityKind),
    Send {
        entity: EntityKind,
        records: usize,
        first: bool,
        timeout: Duration,
    },
}

/// Transport that records calls and fails on request.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    fail_clear: HashSet<EntityKind>,
    /// Entity -> 0-based send index that fails.
    fail_send: HashMap<EntityKind, usize>,
    fail_every_send: HashSet<EntityKind>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_clear(mut self, kind: EntityKind) -> Self {
        self.fail_clear.insert(kind);
        self
    }

    pub fn fail_send(mut self, kind: EntityKind, index: usize) -> Self {
        self.fail_send.insert(kind, index);
        self
    }

    pub fn fail_uploads(mut self, kind: EntityKind) -> Self {
        self.fail_every_send.insert(kind);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Entities that received at least one call, in first-call order.
    pub fn entities_called(&self) -> Vec<EntityKind> {
        let mut seen = Vec::new();
        for call in self.calls() {
            let kind = match call {
                Call::Clear(kind) => kind,
                Call::Send { entity, .. } => entity,
            };
            if !seen.contains(&kind) {
                seen.push(kind);
            }
        }
        seen
    }
}

#[async_trait]
impl SyncTransport for RecordingTransport {
    async fn clear_remote(&self, entity: &EntitySpec) -> Result<Delivery> {
        self.calls.lock().unwrap().push(Call::Clear(entity.kind));
        if self.fail_clear.contains(&entity.kind) {
            return Err(SyncError::transport(entity.name(), "clear refused"));
        }
        Ok(Delivery {
            status: 200,
            message: None,
        })
    }

    async fn send_batch(
        &self,
        entity: &EntitySpec,
        batch: &Batch<'_>,
        is_first: bool,
        timeout: Duration,
    ) -> Result<Delivery> {
        let send_index = {
            let mut calls = self.calls.lock().unwrap();
            let index = calls
                .iter()
                .filter(|c| matches!(c, Call::Send { entity: k, .. } if *k == entity.kind))
                .count();
            calls.push(Call::Send {
                entity: entity.kind,
                records: batch.len(),
                first: is_first,
                timeout,
            });
            index
        };

        if self.fail_every_send.contains(&entity.kind)
            || self.fail_send.get(&entity.kind) == Some(&send_index)
        {
            return Err(SyncError::Rejected {
                entity: entity.name().to_string(),
                status: 500,
                message: "internal error".into(),
                body: "internal error".into(),
            });
        }
        Ok(Delivery {
            status: 201,
            message: Some(format!("{} rows stored", batch.len())),
        })
    }
}

/// Source backed by a table-name -> rows map.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<RawRecord>>,
    failing_tables: HashSet<String>,
    fail_connect: bool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<RawRecord>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Tables fetched, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(SyncError::Source("DSN not found".into()));
        }
        Ok(())
    }

    async fn fetch_rows(&self, query: &TableQuery) -> Result<Vec<RawRecord>> {
        self.fetched.lock().unwrap().push(query.table.clone());
        if self.failing_tables.contains(&query.table) {
            return Err(SyncError::fetch(&query.entity, "table not found"));
        }
        Ok(self.tables.get(&query.table).cloned().unwrap_or_default())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn source_type(&self) -> &str {
        "memory"
    }
}
