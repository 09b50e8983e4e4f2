//! # livebase-realtime
//!
//! Realtime record change delivery for Livebase. Provides:
//!
//! - Client directory with bounded, drop-on-full mailboxes
//! - Rule-aware fan-out of create/update/delete events
//! - Commit-gated delete delivery through a TTL-bounded staging cache
//! - Cross-instance bridge over PostgreSQL `LISTEN/NOTIFY` with lease-based
//!   eviction of crashed instances
//! - An in-process bridge for tests and single-node runs

pub mod bridge;
pub mod broadcast;
pub mod connection;
pub mod message;
pub mod metrics;
pub mod rules;
pub mod server;

pub use bridge::{
    BridgeEnvelope, BridgeTransport, EvictedClient, MemoryBridgeHub, MemoryBridgeTransport,
    PgBridgeTransport, RealtimeBridge,
};
pub use broadcast::RecordChangeBroadcaster;
pub use connection::{Broker, ClientEvent, ClientSession, SessionEnd};
pub use message::Message;
pub use metrics::RealtimeMetrics;
pub use rules::{IdentityRehydrator, RecordExpander, RuleEvaluator};
pub use server::{EngineStatus, RealtimeEngine, RealtimeEngineBuilder};
