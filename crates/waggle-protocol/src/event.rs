//! Persisted event records and their status lifecycle.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status of a stored event.
///
/// An event is `Pending` from the instant it is durably appended until the
/// transport attempt resolves. It becomes `Sent` only after a positive
/// transport acknowledgement, `Failed` otherwise (disconnection, timeout or
/// explicit rejection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Sent,
    Failed,
}

impl EventStatus {
    /// Statuses that still need a (re)send attempt.
    pub fn not_sent() -> [EventStatus; 2] {
        [EventStatus::Pending, EventStatus::Failed]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Sent => "SENT",
            EventStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event status: {0}")]
pub struct StatusParseError(String);

impl FromStr for EventStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "SENT" => Ok(EventStatus::Sent),
            "FAILED" => Ok(EventStatus::Failed),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// Durable record of an outbound publication.
///
/// `id` is generated at first publish and reused on every replay so retries
/// stay traceable to the original attempt. `message` is the serialized JSON
/// payload; the bus never inspects it beyond (de)serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub status: EventStatus,
    pub topic: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(id: Uuid, topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            status: EventStatus::Pending,
            topic: topic.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [EventStatus::Pending, EventStatus::Sent, EventStatus::Failed] {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
        assert!("NOPE".parse::<EventStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventStatus::Pending).unwrap();
        assert_eq!(json, r#""PENDING""#);
    }

    #[test]
    fn new_record_starts_pending() {
        let record = EventRecord::new(Uuid::new_v4(), "orders/created", "{}");
        assert_eq!(record.status, EventStatus::Pending);
    }
}
