//! Topic-broker binding.
//!
//! Publishes are fire-and-forget: once the frame is written the event counts
//! as sent. Subscriptions are wildcard patterns matched locally against
//! every inbound topic, so one frame can fan out to several callbacks.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use waggle_protocol::broker::{BrokerClientFrame, BrokerServerFrame};
use waggle_protocol::{publication_topic, TopicPattern};

use crate::error::SendError;
use crate::registry::{EventCallback, SubscriptionRegistry};

use super::{send_text, SinkHandle};

pub struct BrokerBinding {
    name: String,
    registry: Arc<SubscriptionRegistry>,
    sink: SinkHandle,
}

impl BrokerBinding {
    pub fn new(name: String, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            name,
            registry,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) async fn install(
        &self,
        sink: Box<dyn super::wire::WireSink>,
    ) -> Result<(), SendError> {
        *self.sink.lock().await = Some(sink);
        for pattern in self.registry.patterns() {
            self.wire_subscribe(&pattern).await?;
        }
        Ok(())
    }

    pub(super) async fn close(&self) {
        super::close_sink(&self.sink).await;
    }

    pub(super) async fn teardown(&self) {
        self.sink.lock().await.take();
    }

    pub(super) async fn subscribe(
        &self,
        topic: &str,
        callback: EventCallback,
    ) -> Result<(), SendError> {
        let pattern = TopicPattern::compile(topic)
            .map_err(|e| SendError::Rejected(e.to_string()))?;
        let already_wired = self.registry.register(pattern, callback);
        if !already_wired {
            // While disconnected the registration is enough; install()
            // replays it once a connection exists.
            match self.wire_subscribe(topic).await {
                Ok(()) | Err(SendError::NotConnected) => {}
                Err(e) => return Err(e),
            }
        }
        info!(topic, "subscribed to topic");
        Ok(())
    }

    pub(super) async fn unsubscribe(&self, topic: &str) -> Result<(), SendError> {
        if self.registry.unregister(topic) {
            let frame = BrokerClientFrame::Unsubscribe {
                pattern: topic.to_string(),
            };
            match self.send_frame(&frame).await {
                Ok(()) | Err(SendError::NotConnected) => {}
                Err(e) => return Err(e),
            }
            info!(topic, "unsubscribed from topic");
        }
        Ok(())
    }

    pub(super) async fn send(&self, topic: &str, payload: &Value) -> Result<(), SendError> {
        let frame = BrokerClientFrame::Publish {
            topic: topic.to_string(),
            body: payload.to_string(),
        };
        self.send_frame(&frame).await?;
        debug!(topic, "published event");
        Ok(())
    }

    pub(super) async fn handle_frame(&self, text: &str) {
        let frame: BrokerServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "discarding unreadable frame");
                return;
            }
        };
        let BrokerServerFrame::Message { topic, body } = frame;

        // The broker echoes our own publications back on our topic.
        if topic == publication_topic(&self.name) {
            debug!(%topic, "ignoring own publication");
            return;
        }

        let value: Value = serde_json::from_str(&body).unwrap_or_else(|e| {
            warn!(%topic, error = %e, "unreadable event body, dispatching empty");
            Value::Object(serde_json::Map::new())
        });

        let callbacks = self.registry.matching(&topic);
        debug!(%topic, count = callbacks.len(), "dispatching event");
        for callback in callbacks {
            let topic = topic.clone();
            let value = value.clone();
            tokio::spawn(async move {
                callback(topic, value).await;
            });
        }
    }

    async fn wire_subscribe(&self, pattern: &str) -> Result<(), SendError> {
        let frame = BrokerClientFrame::Subscribe {
            pattern: pattern.to_string(),
        };
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &BrokerClientFrame) -> Result<(), SendError> {
        let text = serde_json::to_string(frame).map_err(|e| SendError::Rejected(e.to_string()))?;
        send_text(&self.sink, text).await
    }
}
