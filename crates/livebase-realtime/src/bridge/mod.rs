//! Cross-instance bridge.
//!
//! Every instance persists one row per connected client in the shared
//! store and announces each change to its siblings. Siblings mirror those
//! clients as remote [`BridgedClient`]s, so a broadcast on any instance
//! reaches every subscriber in the fleet. A heartbeat lease per instance
//! lets survivors evict the clients of a dead one.

pub mod client;
pub mod envelope;
pub mod heartbeat;
pub mod link;
pub mod memory_transport;
pub mod pg_transport;
pub mod realtime_bridge;
pub mod transport;

pub use client::BridgedClient;
pub use envelope::BridgeEnvelope;
pub use link::BridgeLink;
pub use memory_transport::{MemoryBridgeHub, MemoryBridgeTransport};
pub use pg_transport::PgBridgeTransport;
pub use realtime_bridge::RealtimeBridge;
pub use transport::{BridgeTransport, EvictedClient};
