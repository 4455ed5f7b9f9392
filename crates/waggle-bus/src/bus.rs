//! Bus facade.
//!
//! The one object agent code touches. `publish` records first and sends
//! second, and never returns an error: a failed or unsent event becomes
//! status `FAILED` in the store and the next reconnect replays it. The
//! supervisor, the store feed task and the report pump all run behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waggle_protocol::{EventRecord, EventStatus};

use crate::config::BusConfig;
use crate::error::{BusError, SendError};
use crate::registry::{EventCallback, SubscriptionRegistry};
use crate::reporting::{ReportFeed, Reporter};
use crate::store::EventStore;
use crate::supervisor::{self, ConnectionMonitor};
use crate::transport::wire::{Wire, WsWire};
use crate::transport::Transport;

const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Backpressure notification, invoked with the free-slot count (zero) at the
/// moment the staging buffer fills; re-armed once the level drops.
pub type BufferFullHook = Arc<dyn Fn(usize) + Send + Sync>;

pub struct Bus {
    inner: Arc<BusInner>,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    report_pump: JoinHandle<()>,
}

struct BusInner {
    name: String,
    transport: Arc<Transport>,
    store: Arc<EventStore>,
    registry: Arc<SubscriptionRegistry>,
    reporter: Reporter,
    report_channel: String,
    monitor: ConnectionMonitor,
    buffer_was_full: AtomicBool,
    buffer_full_hook: std::sync::Mutex<Option<BufferFullHook>>,
}

impl Bus {
    /// Connect to the configured endpoint and start all background tasks.
    ///
    /// Returns as soon as supervision is running; use
    /// [`Bus::monitor`] to wait for the first connection.
    pub async fn start(
        config: BusConfig,
        reporter: Reporter,
        feed: ReportFeed,
    ) -> Result<Self, BusError> {
        let wire = WsWire::new(config.endpoint(), config.certificate.as_deref())?;
        Self::start_with_wire(config, reporter, feed, Arc::new(wire)).await
    }

    pub(crate) async fn start_with_wire(
        config: BusConfig,
        reporter: Reporter,
        feed: ReportFeed,
        wire: Arc<dyn Wire>,
    ) -> Result<Self, BusError> {
        let name = config.agent_name();
        info!(name = %name, binding = ?config.binding, endpoint = %config.endpoint(), "starting bus");

        let registry = Arc::new(SubscriptionRegistry::new());
        let transport = Arc::new(Transport::new(
            config.binding,
            name.clone(),
            registry.clone(),
        ));
        let store = Arc::new(EventStore::new(config.persistence.clone()));
        store.init().await?;

        let (state_tx, monitor) = supervisor::state_channel();
        let inner = Arc::new(BusInner {
            name,
            transport: transport.clone(),
            store,
            registry,
            reporter,
            report_channel: config.report_channel.clone(),
            monitor,
            buffer_was_full: AtomicBool::new(false),
            buffer_full_hook: std::sync::Mutex::new(None),
        });

        let cancel = CancellationToken::new();
        let hook: supervisor::ReconnectHook = {
            let inner = inner.clone();
            Arc::new(move || {
                let inner = inner.clone();
                Box::pin(async move { inner.on_reconnect().await })
            })
        };
        let supervisor = tokio::spawn(supervisor::run(
            wire,
            transport,
            state_tx,
            cancel.clone(),
            hook,
        ));
        let report_pump = tokio::spawn(Self::pump_reports(inner.clone(), feed));

        Ok(Self {
            inner,
            cancel,
            supervisor,
            report_pump,
        })
    }

    pub fn monitor(&self) -> ConnectionMonitor {
        self.inner.monitor.clone()
    }

    /// Record and send one event, returning its id.
    ///
    /// Never fails: when the event cannot reach the wire it is marked
    /// `FAILED` and resent by replay after the next reconnect.
    pub async fn publish(&self, topic: &str, payload: Value) -> Uuid {
        self.inner.publish(topic, payload).await
    }

    /// Publish on this agent's own publication topic.
    pub async fn publish_own(&self, payload: Value) -> Uuid {
        let topic = waggle_protocol::publication_topic(&self.inner.name);
        self.inner.publish(&topic, payload).await
    }

    /// Register a callback for a topic (broker: wildcard pattern, group:
    /// room). At most one callback per topic; re-subscribing replaces it.
    pub async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<(), SendError> {
        self.inner.transport.subscribe(topic, callback).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SendError> {
        self.inner.transport.unsubscribe(topic).await
    }

    /// Install the backpressure hook; replaces any previous one.
    pub fn on_buffer_full(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self
            .inner
            .buffer_full_hook
            .lock()
            .expect("bus lock poisoned") = Some(Arc::new(hook));
    }

    /// Currently subscribed topics, in subscription order.
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.patterns()
    }

    /// Subscribed topics that are public, single-segment channels.
    pub fn public_topics(&self) -> Vec<String> {
        self.topics()
            .into_iter()
            .filter(|topic| waggle_protocol::is_public(topic))
            .collect()
    }

    /// Resend stored events, preserving ids and creation order.
    ///
    /// Defaults: every stored event, restricted to ones that never went
    /// out. The store's retention TTL bounds how far back that reaches.
    pub async fn replay(&self, since: Option<DateTime<Utc>>, statuses: Option<Vec<EventStatus>>) {
        self.inner.replay(since, statuses).await;
    }

    /// Stop supervision, close the connection and flush the store.
    pub async fn stop(self) {
        info!("stopping bus");
        self.cancel.cancel();
        if tokio::time::timeout(STOP_GRACE, self.supervisor).await.is_err() {
            warn!("supervisor did not stop in time");
        }
        self.report_pump.abort();
        let _ = self.report_pump.await;
        self.inner.store.close().await;
        info!("bus stopped");
    }

    async fn pump_reports(inner: Arc<BusInner>, mut feed: ReportFeed) {
        while let Some(report) = feed.rx.recv().await {
            let payload = match serde_json::to_value(&report) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "could not serialize report");
                    continue;
                }
            };
            let topic = format!("{}/{}", inner.report_channel, inner.name);
            inner.publish(&topic, payload).await;
        }
    }
}

impl BusInner {
    async fn publish(&self, topic: &str, payload: Value) -> Uuid {
        let id = Uuid::new_v4();
        let record = EventRecord::new(id, topic, payload.to_string());

        if let Err(e) = self.store.store(record).await {
            warn!(error = %e, "event staged without durability");
            self.reporter.exception(&e);
        }
        self.watch_buffer_level();

        if !self.monitor.is_connected() {
            debug!(topic, %id, "not connected, event kept for replay");
            self.mark(id, EventStatus::Failed).await;
            return id;
        }

        match self.transport.send(id, topic, &payload).await {
            Ok(()) => self.mark(id, EventStatus::Sent).await,
            Err(e) => {
                warn!(topic, %id, error = %e, "publication failed");
                if matches!(e, SendError::Timeout(_)) {
                    self.reporter.exception(&e);
                }
                self.mark(id, EventStatus::Failed).await;
            }
        }
        id
    }

    async fn replay(&self, since: Option<DateTime<Utc>>, statuses: Option<Vec<EventStatus>>) {
        let statuses = statuses.unwrap_or_else(|| EventStatus::not_sent().to_vec());
        let records = match self.store.retrieve(since, Some(&statuses)).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "replay aborted, store unavailable");
                self.reporter.exception(&e);
                return;
            }
        };
        if records.is_empty() {
            return;
        }
        info!(count = records.len(), "replaying events");

        // Sequential on purpose: per-topic order must survive the retry.
        for record in records {
            let payload: Value = match serde_json::from_str(&record.message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "stored event is unreadable, skipping");
                    continue;
                }
            };
            match self.transport.send(record.id, &record.topic, &payload).await {
                Ok(()) => self.mark(record.id, EventStatus::Sent).await,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "replay send failed");
                    self.mark(record.id, EventStatus::Failed).await;
                }
            }
        }
    }

    // Unbounded on purpose: an ack timeout creates a FAILED event older
    // than the disconnect it triggers, so a time bound would skip it. The
    // retention TTL keeps the pass finite.
    async fn on_reconnect(&self) {
        self.replay(None, None).await;
    }

    /// Edge-triggered buffer-full signal; rearms once the level drops.
    fn watch_buffer_level(&self) {
        if self.store.is_full() {
            if !self.buffer_was_full.swap(true, Ordering::SeqCst) {
                let free_slots = self.store.free_slots();
                warn!("event staging buffer is full, oldest events are dropped");
                self.reporter
                    .send("event_buffer_full", serde_json::json!({ "free_slots": free_slots }));
                let hook = self
                    .buffer_full_hook
                    .lock()
                    .expect("bus lock poisoned")
                    .clone();
                if let Some(hook) = hook {
                    hook(free_slots);
                }
            }
        } else {
            self.buffer_was_full.store(false, Ordering::SeqCst);
        }
    }

    async fn mark(&self, id: Uuid, status: EventStatus) {
        if let Err(e) = self.store.update(id, status).await {
            warn!(%id, error = %e, "could not record event status");
        }
    }
}
