//! Frame vocabulary of the broker binding.
//!
//! The broker routes publications by topic string and supports wildcard
//! subscriptions. Delivery is fire-and-forget at the wire level; confidence
//! comes from the event store retry path, not from acknowledgements.

use serde::{Deserialize, Serialize};

/// Agent -> broker frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerClientFrame {
    /// Register interest in a topic pattern (`+`/`#` wildcards allowed).
    Subscribe { pattern: String },
    /// Drop interest in a previously subscribed pattern.
    Unsubscribe { pattern: String },
    /// Publish a serialized JSON payload to a topic.
    Publish { topic: String, body: String },
}

/// Broker -> agent frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerServerFrame {
    /// A publication routed to one of the agent's subscriptions.
    Message { topic: String, body: String },
}
