//! Clients, the client directory, and the per-connection event loop.

pub mod broker;
pub mod client;
pub mod events;
pub mod options;
pub mod session;

pub use broker::Broker;
pub use client::{Client, ClientState, SendOutcome};
pub use events::ClientEvent;
pub use options::SubscriptionOptions;
pub use session::{ClientSession, SessionEnd};
