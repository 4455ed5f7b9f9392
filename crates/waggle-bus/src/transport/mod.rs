//! Wire bindings.
//!
//! The bus speaks exactly one binding, chosen at configuration time:
//!
//! * [`BrokerBinding`] — topic broker with wildcard subscriptions and
//!   fire-and-forget publishes.
//! * [`GroupBinding`] — room-based groups where every publish is
//!   acknowledged by its own echo.
//!
//! Both expose the same surface through [`Transport`], so the facade and
//! the supervisor never branch on the binding.

pub mod wire;

mod broker;
mod group;

pub use broker::BrokerBinding;
pub use group::GroupBinding;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::BindingKind;
use crate::error::SendError;
use crate::registry::{EventCallback, SubscriptionRegistry};
use wire::WireSink;

/// Write half shared between the supervisor (which installs and removes it)
/// and the bindings (which send through it).
pub(crate) type SinkHandle = Arc<Mutex<Option<Box<dyn WireSink>>>>;

/// Resolution of one tracked group publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// Own echo came back; the event reached the room.
    Delivered,
    /// The remote does not consider us a member of the room.
    NotJoined,
    /// The remote rejected the publication outright.
    Rejected,
}

async fn send_text(sink: &SinkHandle, text: String) -> Result<(), SendError> {
    let mut guard = sink.lock().await;
    match guard.as_mut() {
        None => Err(SendError::NotConnected),
        Some(sink) => sink.send(text).await.map_err(SendError::from),
    }
}

async fn close_sink(sink: &SinkHandle) {
    let mut guard = sink.lock().await;
    if let Some(sink) = guard.as_mut() {
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "close failed, connection already dead");
        }
    }
}

pub enum Transport {
    Broker(BrokerBinding),
    Group(GroupBinding),
}

impl Transport {
    pub fn new(kind: BindingKind, name: String, registry: Arc<SubscriptionRegistry>) -> Self {
        match kind {
            BindingKind::Broker => Transport::Broker(BrokerBinding::new(name, registry)),
            BindingKind::Group => Transport::Group(GroupBinding::new(name, registry)),
        }
    }

    /// Adopt a freshly connected sink and re-establish every registered
    /// subscription on the wire.
    pub async fn install(&self, sink: Box<dyn WireSink>) -> Result<(), SendError> {
        match self {
            Transport::Broker(b) => b.install(sink).await,
            Transport::Group(g) => g.install(sink).await,
        }
    }

    /// Initiate the close handshake on the write half. Used on shutdown so
    /// the server sees a clean disconnect instead of a dropped socket.
    pub async fn close(&self) {
        match self {
            Transport::Broker(b) => b.close().await,
            Transport::Group(g) => g.close().await,
        }
    }

    /// Drop the sink and cancel anything waiting on the dead connection.
    pub async fn teardown(&self) {
        match self {
            Transport::Broker(b) => b.teardown().await,
            Transport::Group(g) => g.teardown().await,
        }
    }

    /// Dispatch one inbound frame.
    pub async fn handle_frame(&self, text: &str) {
        match self {
            Transport::Broker(b) => b.handle_frame(text).await,
            Transport::Group(g) => g.handle_frame(text).await,
        }
    }

    /// Register a callback and subscribe on the wire when connected.
    pub async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<(), SendError> {
        match self {
            Transport::Broker(b) => b.subscribe(topic, callback).await,
            Transport::Group(g) => g.subscribe(topic, callback).await,
        }
    }

    /// Remove a callback and unsubscribe on the wire when connected.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SendError> {
        match self {
            Transport::Broker(b) => b.unsubscribe(topic).await,
            Transport::Group(g) => g.unsubscribe(topic).await,
        }
    }

    /// Attempt to put one event on the wire.
    ///
    /// `id` identifies the event across retries; replay reuses the original
    /// id so the remote can deduplicate.
    pub async fn send(&self, id: Uuid, topic: &str, payload: &Value) -> Result<(), SendError> {
        match self {
            Transport::Broker(b) => b.send(topic, payload).await,
            Transport::Group(g) => g.send(id, topic, payload).await,
        }
    }
}
