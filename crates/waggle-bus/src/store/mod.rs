//! Durable, time-ordered log of outbound events.
//!
//! Writes land in a bounded in-memory staging buffer first; a feed task
//! drains it into the durable backend whenever the backend answers a ping.
//! Retrieval merges both sides so replay sees staged events even while the
//! backend lags. A retention TTL bounds growth regardless of status.

mod backend;
mod postgres;

pub use backend::{MemoryBackend, PersistenceBackend};
pub use postgres::PostgresBackend;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waggle_protocol::{EventRecord, EventStatus};

use crate::config::PersistenceSettings;
use crate::error::PersistenceError;

const FEED_DELAY: Duration = Duration::from_secs(5);

/// Bounded FIFO holding events the backend has not absorbed yet.
struct StagingBuffer {
    items: VecDeque<EventRecord>,
    capacity: usize,
}

impl StagingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    fn put(&mut self, record: EventRecord) {
        while self.items.len() >= self.capacity {
            debug!(len = self.items.len(), "staging buffer full, dropping oldest");
            self.items.pop_front();
        }
        self.items.push_back(record);
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }

    fn update(&mut self, id: Uuid, status: EventStatus) -> bool {
        match self.items.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    fn drain(&mut self) -> Vec<EventRecord> {
        self.items.drain(..).collect()
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.items.retain(|r| r.created_at >= cutoff);
    }
}

pub struct EventStore {
    settings: PersistenceSettings,
    staging: Mutex<StagingBuffer>,
    backend: OnceLock<Arc<dyn PersistenceBackend>>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStore {
    pub fn new(settings: PersistenceSettings) -> Self {
        let staging = StagingBuffer::new(settings.memory_size);
        Self {
            settings,
            staging: Mutex::new(staging),
            backend: OnceLock::new(),
            feed_task: Mutex::new(None),
        }
    }

    /// Build a store over an already-constructed backend.
    pub fn with_backend(settings: PersistenceSettings, backend: Arc<dyn PersistenceBackend>) -> Self {
        let store = Self::new(settings);
        let _ = store.backend.set(backend);
        store
    }

    /// Launch the feed task and initialize the backend.
    ///
    /// A misconfigured backend (unknown name, missing url) is an error; a
    /// configured backend that is merely unreachable only degrades the store
    /// to staging-only until the feed task can reach it.
    pub async fn init(self: &Arc<Self>) -> Result<(), PersistenceError> {
        let mut feed_task = self.feed_task.lock().expect("store lock poisoned");
        if feed_task.is_none() {
            let store = Arc::clone(self);
            *feed_task = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(FEED_DELAY).await;
                    store.feed_pass().await;
                }
            }));
        }
        drop(feed_task);

        if self.backend.get().is_none() {
            match self.settings.backend.as_deref() {
                None => {
                    info!("no persistence backend selected, staging buffer only");
                    return Ok(());
                }
                Some("memory") => {
                    let _ = self.backend.set(Arc::new(MemoryBackend::new()));
                }
                Some("postgres") => {
                    let url = self.settings.url.as_deref().ok_or_else(|| {
                        PersistenceError::Backend("postgres backend requires a url".to_string())
                    })?;
                    match PostgresBackend::connect(url).await {
                        Ok(backend) => {
                            let _ = self.backend.set(Arc::new(backend));
                        }
                        Err(e) => {
                            warn!(error = %e, "durable backend unreachable, staging only");
                            return Ok(());
                        }
                    }
                }
                Some(other) => {
                    return Err(PersistenceError::Backend(format!(
                        "unknown persistence backend: {other}"
                    )));
                }
            }
        }

        if let Some(backend) = self.backend.get() {
            if let Err(e) = backend.init().await {
                warn!(error = %e, "backend initialization failed, staging only for now");
                return Ok(());
            }
            if let Err(e) = backend.prune_before(self.ttl_cutoff()).await {
                warn!(error = %e, "could not prune expired events at init");
            }
        }
        Ok(())
    }

    /// Stop the feed task and flush the staging buffer one last time.
    pub async fn close(&self) {
        let handle = self.feed_task.lock().expect("store lock poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.feed_pass().await;
    }

    /// Append a new record.
    ///
    /// The record always lands in the staging buffer so replay works even
    /// when durability is degraded; the error only signals that the durable
    /// backend is unreachable right now.
    pub async fn store(&self, record: EventRecord) -> Result<(), PersistenceError> {
        debug!(id = %record.id, topic = %record.topic, "storing event");
        self.staging.lock().expect("store lock poisoned").put(record);

        if self.backend.get().is_some() && !self.ping().await {
            return Err(PersistenceError::Unreachable);
        }
        Ok(())
    }

    /// Idempotent status transition; last write wins.
    pub async fn update(&self, id: Uuid, status: EventStatus) -> Result<(), PersistenceError> {
        debug!(%id, status = status.as_str(), "updating event status");
        if self.staging.lock().expect("store lock poisoned").update(id, status) {
            return Ok(());
        }

        match self.backend.get() {
            None => Ok(()),
            Some(backend) => {
                if !self.ping().await {
                    return Err(PersistenceError::Unreachable);
                }
                backend.update(id, status).await
            }
        }
    }

    /// Events created at or after `since`, restricted to `statuses`, ordered
    /// by creation time ascending.
    pub async fn retrieve(
        &self,
        since: Option<DateTime<Utc>>,
        statuses: Option<&[EventStatus]>,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        let mut records = match self.backend.get() {
            None => Vec::new(),
            Some(backend) => {
                if !self.ping().await {
                    return Err(PersistenceError::Unreachable);
                }
                backend.retrieve(since, statuses).await?
            }
        };

        {
            let staging = self.staging.lock().expect("store lock poisoned");
            for record in staging.items.iter() {
                if since.is_some_and(|s| record.created_at < s) {
                    continue;
                }
                if statuses.is_some_and(|set| !set.contains(&record.status)) {
                    continue;
                }
                // A staged copy is newer than any backend copy of the same id.
                if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
                    *existing = record.clone();
                } else {
                    records.push(record.clone());
                }
            }
        }

        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Whether the staging buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.staging.lock().expect("store lock poisoned").is_full()
    }

    pub fn free_slots(&self) -> usize {
        self.staging.lock().expect("store lock poisoned").free_slots()
    }

    async fn ping(&self) -> bool {
        match self.backend.get() {
            None => true,
            Some(backend) => backend.ping().await,
        }
    }

    fn ttl_cutoff(&self) -> DateTime<Utc> {
        Utc::now()
            - chrono::Duration::from_std(self.settings.ttl())
                .unwrap_or_else(|_| chrono::Duration::hours(1))
    }

    /// One pass of the feed loop: expire old staged events, then drain the
    /// staging buffer into the backend when it is reachable.
    async fn feed_pass(&self) {
        let cutoff = self.ttl_cutoff();
        self.staging.lock().expect("store lock poisoned").prune(cutoff);

        let Some(backend) = self.backend.get() else {
            return;
        };
        if !backend.ping().await {
            warn!("no connection to backend to empty staged events");
            return;
        }

        let drained = self.staging.lock().expect("store lock poisoned").drain();
        if !drained.is_empty() {
            info!(count = drained.len(), "dumping staged events into backend");
        }
        let mut failed = Vec::new();
        for record in drained {
            if let Err(e) = backend.store(&record).await {
                warn!(error = %e, id = %record.id, "could not feed event to backend");
                failed.push(record);
            }
        }
        if !failed.is_empty() {
            let mut staging = self.staging.lock().expect("store lock poisoned");
            for record in failed {
                staging.put(record);
            }
        }

        if let Err(e) = backend.prune_before(cutoff).await {
            warn!(error = %e, "could not prune expired events");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn settings(memory_size: usize, ttl_secs: u64) -> PersistenceSettings {
        PersistenceSettings {
            backend: None,
            url: None,
            memory_size,
            ttl_secs,
        }
    }

    fn record(topic: &str) -> EventRecord {
        EventRecord::new(Uuid::new_v4(), topic, "{}")
    }

    #[tokio::test]
    async fn staged_events_are_retrievable_before_any_feed_pass() {
        let store = Arc::new(EventStore::with_backend(
            settings(16, 3600),
            Arc::new(MemoryBackend::new()),
        ));
        let event = record("orders/created");
        store.store(event.clone()).await.unwrap();

        let not_sent = EventStatus::not_sent();
        let events = store.retrieve(None, Some(&not_sent)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
        assert_eq!(events[0].status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn update_hits_the_staged_copy_first() {
        let store = Arc::new(EventStore::new(settings(16, 3600)));
        let event = record("t");
        store.store(event.clone()).await.unwrap();
        store.update(event.id, EventStatus::Sent).await.unwrap();

        let sent = [EventStatus::Sent];
        let events = store.retrieve(None, Some(&sent)).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn feed_pass_moves_staged_events_into_the_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(EventStore::with_backend(settings(16, 3600), backend.clone()));
        let event = record("t");
        store.store(event.clone()).await.unwrap();

        store.feed_pass().await;
        assert_eq!(store.free_slots(), 16);
        let in_backend = backend.retrieve(None, None).await.unwrap();
        assert_eq!(in_backend.len(), 1);
        assert_eq!(in_backend[0].id, event.id);

        // Still retrievable through the store after the move.
        let events = store.retrieve(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn staging_buffer_drops_oldest_and_reports_capacity() {
        let store = Arc::new(EventStore::new(settings(2, 3600)));
        let first = record("a");
        store.store(first.clone()).await.unwrap();
        assert!(!store.is_full());
        store.store(record("b")).await.unwrap();
        assert!(store.is_full());
        assert_eq!(store.free_slots(), 0);

        // Third insert evicts the oldest instead of growing.
        store.store(record("c")).await.unwrap();
        let events = store.retrieve(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|r| r.id != first.id));
    }

    #[tokio::test]
    async fn feed_pass_expires_staged_events_past_the_ttl() {
        let store = Arc::new(EventStore::new(settings(16, 60)));
        let mut expired = record("old");
        expired.created_at = Utc::now() - ChronoDuration::seconds(120);
        store.store(expired).await.unwrap();
        store.store(record("fresh")).await.unwrap();

        store.feed_pass().await;
        let events = store.retrieve(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, "fresh");
    }

    #[tokio::test]
    async fn retrieve_merges_without_duplicating_ids() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(EventStore::with_backend(settings(16, 3600), backend.clone()));
        let event = record("t");
        // Same event known to the backend and still staged with a newer status.
        backend.store(&event).await.unwrap();
        let mut staged = event.clone();
        staged.status = EventStatus::Failed;
        store.store(staged).await.unwrap();

        let events = store.retrieve(None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
    }
}
