//! Shared protocol definitions for agents talking over the waggle bus.
//!
//! This crate holds everything both sides of a bus connection must agree on:
//! the persisted event record and its status lifecycle, topic naming
//! conventions, wildcard topic patterns, and the JSON frame vocabularies of
//! the two wire bindings (broker routing and group membership rooms).

pub mod broker;
pub mod event;
pub mod group;
pub mod pattern;
pub mod topic;

pub use event::{EventRecord, EventStatus, StatusParseError};
pub use pattern::{PatternError, TopicPattern};
pub use topic::{is_public, publication_topic, room_name};
