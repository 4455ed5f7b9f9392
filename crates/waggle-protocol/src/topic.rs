//! Topic naming conventions.
//!
//! Every agent owns a publication topic named `{agent}/publications`. The
//! group binding maps topics onto room names 1:1, substituting `.` for `/`
//! since the underlying presence protocol forbids slashes in room names.

/// Topic an agent publishes its own events to.
pub fn publication_topic(agent: &str) -> String {
    format!("{agent}/publications")
}

/// Room name used by the group binding for a topic.
pub fn room_name(topic: &str) -> String {
    topic.replace('/', ".")
}

/// Whether a topic is a public, single-segment channel.
pub fn is_public(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains('/') && !topic.contains('.')
}
