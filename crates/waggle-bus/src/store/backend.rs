//! Durable backend contract and the in-memory implementation.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use waggle_protocol::{EventRecord, EventStatus};

use crate::error::PersistenceError;

/// A durable store of event records.
///
/// Implementations must keep `retrieve` ordered by creation time ascending;
/// replay depends on it to preserve per-topic publish order.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Prepare storage (schema, indexes). Called once from `EventStore::init`.
    async fn init(&self) -> Result<(), PersistenceError>;

    /// Lightweight liveness probe. Must be cheap; it runs before every write.
    async fn ping(&self) -> bool;

    async fn store(&self, record: &EventRecord) -> Result<(), PersistenceError>;

    /// Idempotent status transition, last write wins.
    async fn update(&self, id: Uuid, status: EventStatus) -> Result<(), PersistenceError>;

    async fn retrieve(
        &self,
        since: Option<DateTime<Utc>>,
        statuses: Option<&[EventStatus]>,
    ) -> Result<Vec<EventRecord>, PersistenceError>;

    /// Drop records created before the cutoff. Returns the number removed.
    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError>;
}

/// Backend keeping everything in process memory.
///
/// Durability ends with the process; useful for tests and for agents that
/// only need replay across reconnects, not across restarts.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn init(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn store(&self, record: &EventRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().expect("backend lock poisoned");
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, status: EventStatus) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().expect("backend lock poisoned");
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.status = status;
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        since: Option<DateTime<Utc>>,
        statuses: Option<&[EventStatus]>,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        let records = self.records.lock().expect("backend lock poisoned");
        let mut matched: Vec<EventRecord> = records
            .iter()
            .filter(|r| since.is_none_or(|s| r.created_at >= s))
            .filter(|r| statuses.is_none_or(|set| set.contains(&r.status)))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }

    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let mut records = self.records.lock().expect("backend lock poisoned");
        let total = records.len();
        records.retain(|r| r.created_at >= before);
        Ok((total - records.len()) as u64)
    }
}
