//! In-process websocket servers with the minimal broker and group
//! semantics the bus expects from a real deployment.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use waggle_bus::{BindingKind, BusConfig, PersistenceSettings, TopicPattern};

/// Frame handler: replies to send back for one inbound frame.
pub type Behavior = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

pub struct TestServer {
    pub port: u16,
    /// Every text frame any connection sent us, in order.
    pub received: mpsc::UnboundedReceiver<String>,
    /// Push a frame to the currently connected client.
    pub inject: broadcast::Sender<String>,
    /// Drop the current connection; the server keeps accepting new ones.
    pub kick: broadcast::Sender<()>,
}

pub async fn spawn_server(behavior: Behavior) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (inject, _) = broadcast::channel::<String>(64);
    let (kick, _) = broadcast::channel::<()>(4);

    let inject_tx = inject.clone();
    let kick_tx = kick.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => continue,
            };
            let (mut write, mut read) = ws.split();
            let mut inject_rx = inject_tx.subscribe();
            let mut kick_rx = kick_tx.subscribe();

            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(text.clone());
                            for reply in behavior(&text) {
                                if write.send(Message::Text(reply)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break,
                    },
                    Ok(frame) = inject_rx.recv() => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    _ = kick_rx.recv() => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        }
    });

    TestServer {
        port,
        received,
        inject,
        kick,
    }
}

/// Broker semantics: wildcard subscriptions, publishes routed back to the
/// client when one of its patterns matches (including its own frames).
pub fn broker_behavior() -> Behavior {
    let patterns: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    Arc::new(move |text| {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        match value["type"].as_str() {
            Some("subscribe") => {
                if let Some(pattern) = value["pattern"].as_str() {
                    patterns.lock().unwrap().push(pattern.to_string());
                }
                Vec::new()
            }
            Some("unsubscribe") => {
                if let Some(pattern) = value["pattern"].as_str() {
                    patterns.lock().unwrap().retain(|p| p != pattern);
                }
                Vec::new()
            }
            Some("publish") => {
                let Some(topic) = value["topic"].as_str() else {
                    return Vec::new();
                };
                let matched = patterns.lock().unwrap().iter().any(|p| {
                    TopicPattern::compile(p)
                        .map(|pattern| pattern.matches(topic))
                        .unwrap_or(false)
                });
                if matched {
                    vec![json!({
                        "type": "message",
                        "topic": topic,
                        "body": value["body"],
                    })
                    .to_string()]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    })
}

/// Group semantics: publishes from room members are echoed back with the
/// sender's nick, others get `not_joined`.
pub fn group_behavior() -> Behavior {
    let rooms: Arc<Mutex<HashMap<String, HashSet<String>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let nick: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    Arc::new(move |text| {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        match value["type"].as_str() {
            Some("join") => {
                let (Some(room), Some(who)) = (value["room"].as_str(), value["nick"].as_str())
                else {
                    return Vec::new();
                };
                nick.lock().unwrap().replace(who.to_string());
                rooms
                    .lock()
                    .unwrap()
                    .entry(room.to_string())
                    .or_default()
                    .insert(who.to_string());
                Vec::new()
            }
            Some("leave") => {
                if let (Some(room), Some(who)) = (value["room"].as_str(), value["nick"].as_str()) {
                    if let Some(members) = rooms.lock().unwrap().get_mut(room) {
                        members.remove(who);
                    }
                }
                Vec::new()
            }
            Some("publish") => {
                let Some(room) = value["room"].as_str() else {
                    return Vec::new();
                };
                let who = nick.lock().unwrap().clone().unwrap_or_default();
                let member = rooms
                    .lock()
                    .unwrap()
                    .get(room)
                    .is_some_and(|members| members.contains(&who));
                if member {
                    vec![json!({
                        "type": "message",
                        "id": value["id"],
                        "room": room,
                        "from": who,
                        "body": value["body"],
                    })
                    .to_string()]
                } else {
                    vec![json!({
                        "type": "not_joined",
                        "id": value["id"],
                        "room": room,
                    })
                    .to_string()]
                }
            }
            _ => Vec::new(),
        }
    })
}

pub fn test_config(name: &str, binding: BindingKind, port: u16) -> BusConfig {
    BusConfig {
        name: Some(name.to_string()),
        host: "127.0.0.1".to_string(),
        port: Some(port),
        binding,
        persistence: PersistenceSettings {
            backend: Some("memory".to_string()),
            ..PersistenceSettings::default()
        },
        ..BusConfig::default()
    }
}

/// Next frame of the given type, skipping everything else.
pub async fn next_frame_of(
    received: &mut mpsc::UnboundedReceiver<String>,
    kind: &str,
) -> Value {
    loop {
        let text = tokio::time::timeout(std::time::Duration::from_secs(10), received.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server channel closed");
        let value: Value = serde_json::from_str(&text).unwrap();
        if value["type"] == kind {
            return value;
        }
    }
}
