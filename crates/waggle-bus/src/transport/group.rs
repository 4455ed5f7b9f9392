//! Group (room) binding.
//!
//! Topics map to room names by replacing `/` with `.`. Every publish is
//! tracked: the server echoes the publication back to the room, and seeing
//! our own echo with the matching id is the acknowledgement. A publish with
//! no echo within the ack window means the connection is only half alive,
//! so the binding forces a disconnect and lets the supervisor rebuild it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use waggle_protocol::group::{GroupClientFrame, GroupServerFrame};
use waggle_protocol::{publication_topic, room_name, TopicPattern};

use crate::error::SendError;
use crate::registry::{EventCallback, SubscriptionRegistry};

use super::{send_text, AckOutcome, SinkHandle};

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GroupBinding {
    name: String,
    registry: Arc<SubscriptionRegistry>,
    sink: SinkHandle,
    pending: StdMutex<HashMap<Uuid, oneshot::Sender<AckOutcome>>>,
    /// Rooms joined on the current connection, including publish-only rooms
    /// that carry no subscription. Membership dies with the connection.
    joined: StdMutex<HashSet<String>>,
}

impl GroupBinding {
    pub fn new(name: String, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            name,
            registry,
            sink: Arc::new(Mutex::new(None)),
            pending: StdMutex::new(HashMap::new()),
            joined: StdMutex::new(HashSet::new()),
        }
    }

    pub(super) async fn install(
        &self,
        sink: Box<dyn super::wire::WireSink>,
    ) -> Result<(), SendError> {
        *self.sink.lock().await = Some(sink);
        self.join_known_rooms().await
    }

    /// Our own publication room first: publishes ack through its echo.
    async fn join_known_rooms(&self) -> Result<(), SendError> {
        self.wire_join(&room_name(&publication_topic(&self.name)))
            .await?;
        for topic in self.registry.patterns() {
            self.wire_join(&room_name(&topic)).await?;
        }
        Ok(())
    }

    pub(super) async fn close(&self) {
        super::close_sink(&self.sink).await;
    }

    pub(super) async fn teardown(&self) {
        self.sink.lock().await.take();
        // Dropping the senders resolves every in-flight publish as cancelled.
        self.pending.lock().expect("pending lock poisoned").clear();
        self.joined.lock().expect("joined lock poisoned").clear();
    }

    pub(super) async fn subscribe(
        &self,
        topic: &str,
        callback: EventCallback,
    ) -> Result<(), SendError> {
        let already_joined = self.registry.register(TopicPattern::literal(topic), callback);
        if !already_joined {
            match self.wire_join(&room_name(topic)).await {
                Ok(()) | Err(SendError::NotConnected) => {}
                Err(e) => return Err(e),
            }
        }
        info!(topic, "subscribed to room");
        Ok(())
    }

    pub(super) async fn unsubscribe(&self, topic: &str) -> Result<(), SendError> {
        if self.registry.unregister(topic) {
            let room = room_name(topic);
            self.joined.lock().expect("joined lock poisoned").remove(&room);
            let frame = GroupClientFrame::Leave {
                room,
                nick: self.name.clone(),
            };
            match self.send_frame(&frame).await {
                Ok(()) | Err(SendError::NotConnected) => {}
                Err(e) => return Err(e),
            }
            info!(topic, "left room");
        }
        Ok(())
    }

    pub(super) async fn send(
        &self,
        id: Uuid,
        topic: &str,
        payload: &Value,
    ) -> Result<(), SendError> {
        let room = room_name(topic);
        // First publish into a new room joins it implicitly.
        if !self.is_joined(&room) {
            self.wire_join(&room).await?;
        }
        match self.attempt(id, &room, payload).await? {
            AckOutcome::Delivered => Ok(()),
            AckOutcome::Rejected => Err(SendError::Rejected("stream error".to_string())),
            AckOutcome::NotJoined => {
                // Membership can be lost server-side without us noticing.
                warn!(%room, "not in the room, joining and retrying");
                self.wire_join(&room).await?;
                match self.attempt(id, &room, payload).await? {
                    AckOutcome::Delivered => Ok(()),
                    AckOutcome::NotJoined => {
                        Err(SendError::Rejected(format!("cannot join room {room}")))
                    }
                    AckOutcome::Rejected => Err(SendError::Rejected("stream error".to_string())),
                }
            }
        }
    }

    /// One wire attempt: track the id, send, wait for the echo.
    async fn attempt(&self, id: Uuid, room: &str, payload: &Value) -> Result<AckOutcome, SendError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        let frame = GroupClientFrame::Publish {
            id,
            room: room.to_string(),
            body: payload.to_string(),
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // Sender dropped: the connection died while we were waiting.
            Ok(Err(_)) => Err(SendError::Cancelled),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&id);
                // Closing the write half ends the read loop; the supervisor
                // rebuilds the connection.
                warn!(%id, room, "no echo within the ack window, forcing reconnect");
                self.close().await;
                Err(SendError::Timeout(ACK_TIMEOUT))
            }
        }
    }

    pub(super) async fn handle_frame(&self, text: &str) {
        let frame: GroupServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "discarding unreadable frame");
                return;
            }
        };
        match frame {
            GroupServerFrame::Message {
                id,
                room,
                from,
                body,
            } => {
                if from == self.name {
                    // Our echo doubles as the ack; never dispatched locally.
                    self.resolve(id, AckOutcome::Delivered);
                    return;
                }
                let topic = room.replace('.', "/");
                let value: Value = serde_json::from_str(&body).unwrap_or_else(|e| {
                    warn!(%topic, error = %e, "unreadable event body, dispatching empty");
                    Value::Object(serde_json::Map::new())
                });
                let callbacks = self.registry.matching(&topic);
                debug!(%topic, %from, count = callbacks.len(), "dispatching event");
                for callback in callbacks {
                    let topic = topic.clone();
                    let value = value.clone();
                    tokio::spawn(async move {
                        callback(topic, value).await;
                    });
                }
            }
            GroupServerFrame::NotJoined { id, room } => {
                debug!(%id, %room, "publication refused, not a member");
                self.resolve(id, AckOutcome::NotJoined);
            }
            GroupServerFrame::StreamError { id } => {
                match id {
                    Some(id) => self.resolve(id, AckOutcome::Rejected),
                    None => warn!("stream error without an id"),
                }
                // Room state is unreliable after a stream error.
                self.rejoin_all().await;
            }
        }
    }

    fn resolve(&self, id: Uuid, outcome: AckOutcome) {
        let sender = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => debug!(%id, "ack for an unknown publication"),
        }
    }

    async fn rejoin_all(&self) {
        if let Err(e) = self.join_known_rooms().await {
            warn!(error = %e, "could not re-join rooms");
        }
    }

    fn is_joined(&self, room: &str) -> bool {
        self.joined.lock().expect("joined lock poisoned").contains(room)
    }

    async fn wire_join(&self, room: &str) -> Result<(), SendError> {
        let frame = GroupClientFrame::Join {
            room: room.to_string(),
            nick: self.name.clone(),
        };
        self.send_frame(&frame).await?;
        self.joined
            .lock()
            .expect("joined lock poisoned")
            .insert(room.to_string());
        Ok(())
    }

    async fn send_frame(&self, frame: &GroupClientFrame) -> Result<(), SendError> {
        let text = serde_json::to_string(frame).map_err(|e| SendError::Rejected(e.to_string()))?;
        send_text(&self.sink, text).await
    }
}
