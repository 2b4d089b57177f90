//! # torbo-events — the gateway event bus
//!
//! In-process pub/sub with a bounded ring buffer of recent events, wildcard
//! topic subscriptions, live streaming clients (for SSE fan-out at the HTTP
//! layer), and durable storage of a fixed critical subset in a SQLite audit
//! table.
//!
//! Every other component publishes here; none of them may assume a
//! subscriber exists.

pub mod audit;
pub mod bus;
pub mod topic;

pub use audit::AuditStore;
pub use bus::{EventBus, EventHandler};
pub use topic::{is_critical_topic, topic_matches};
