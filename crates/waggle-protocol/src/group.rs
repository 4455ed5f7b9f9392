//! Frame vocabulary of the group binding.
//!
//! Topics map 1:1 onto membership rooms. A publication is acknowledged by the
//! server echoing the message (same id, sender's own nick) back to every room
//! member including the publisher; publishing to a room the agent has not
//! joined is answered with an explicit `not_joined` failure.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agent -> server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupClientFrame {
    /// Enter a room under the given nick.
    Join { room: String, nick: String },
    /// Leave a room.
    Leave { room: String, nick: String },
    /// Publish a serialized JSON payload into a room.
    Publish { id: Uuid, room: String, body: String },
}

/// Server -> agent frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupServerFrame {
    /// A publication delivered to a room member. The publisher receives its
    /// own messages back; that echo is the delivery acknowledgement.
    Message {
        id: Uuid,
        room: String,
        from: String,
        body: String,
    },
    /// The publication was rejected because the sender is not a room member.
    NotJoined { id: Uuid, room: String },
    /// Protocol-level stream error, optionally tied to an in-flight message.
    StreamError { id: Option<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_is_tagged_snake_case() {
        let frame = GroupClientFrame::Join {
            room: "orders.created".to_string(),
            nick: "billing".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"join""#));
        assert!(json.contains(r#""room":"orders.created""#));
    }

    #[test]
    fn publish_and_echo_share_the_id() {
        let id = Uuid::new_v4();
        let publish = GroupClientFrame::Publish {
            id,
            room: "monitoring".to_string(),
            body: "{}".to_string(),
        };
        let json = serde_json::to_string(&publish).unwrap();
        let echoed = format!(
            r#"{{"type":"message","id":"{id}","room":"monitoring","from":"billing","body":"{{}}"}}"#
        );
        let frame: GroupServerFrame = serde_json::from_str(&echoed).unwrap();
        match frame {
            GroupServerFrame::Message { id: echoed_id, .. } => assert_eq!(echoed_id, id),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(json.contains(&id.to_string()));
    }

    #[test]
    fn stream_error_id_is_optional() {
        let frame: GroupServerFrame =
            serde_json::from_str(r#"{"type":"stream_error","id":null}"#).unwrap();
        assert_eq!(frame, GroupServerFrame::StreamError { id: None });
    }
}
