//! Reliable publish/subscribe bus for long-running agents.
//!
//! Every published event is written to a durable log before it touches the
//! wire; a supervisor keeps reconnecting forever and replays whatever never
//! went out. Two wire bindings are available behind one facade: a topic
//! broker with wildcard subscriptions and an acknowledged room-based group
//! binding.
//!
//! ```no_run
//! use serde_json::json;
//! use waggle_bus::{callback, reporting, Bus, BusConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BusConfig::load()?;
//! let (reporter, feed) = reporting::channel(config.agent_name());
//! let bus = Bus::start(config, reporter, feed).await?;
//!
//! bus.subscribe(
//!     "orders/+/created",
//!     callback(|topic, body| async move {
//!         println!("{topic}: {body}");
//!     }),
//! )
//! .await?;
//!
//! bus.publish("billing/publications", json!({"invoice": 42})).await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod registry;
pub mod reporting;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use bus::{BufferFullHook, Bus};
pub use config::{BindingKind, BusConfig, PersistenceSettings, Scheme};
pub use error::{BusError, PersistenceError, SendError, WireError};
pub use registry::{callback, EventCallback, SubscriptionRegistry};
pub use reporting::{Report, ReportFeed, Reporter};
pub use store::{EventStore, MemoryBackend, PersistenceBackend, PostgresBackend};
pub use supervisor::{ConnectionMonitor, ConnectionState};

pub use waggle_protocol::{EventRecord, EventStatus, TopicPattern};
