//! # torbo-delegation — cross-node task delegation
//!
//! Lets this node ship a task to a peer whose advertised capabilities meet
//! the requirement, and accept such tasks itself, with origin and executor
//! authenticated by Ed25519 signatures over short canonical strings.
//!
//! The engine owns the outbound/inbound tracking tables and the peer
//! capability cache; everything else (local task queue, node directory,
//! installed skills, key discovery) comes in through collaborator traits so
//! tests can substitute stubs.

pub mod client;
pub mod engine;
pub mod state;
pub mod traits;

pub use client::{HttpPeerKeyResolver, PeerClient};
pub use engine::{DelegationEngine, DelegationSettings};
pub use state::{InboundEntry, OutboundEntry};
pub use traits::{
    InMemoryTaskSink, LocalTaskStatus, PeerAddr, PeerDirectory, SkillCatalog, StaticKeyResolver,
    StaticPeerDirectory, StaticSkillCatalog, TaskSink,
};
