//! Client lifecycle events.

use livebase_core::types::ClientId;

use super::session::SessionEnd;

/// Published on the engine's event channel whenever a local client comes
/// or goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection was accepted and its client registered.
    Connected {
        /// The new client.
        client_id: ClientId,
    },
    /// A connection's event loop exited and its client was unregistered.
    Disconnected {
        /// The departed client.
        client_id: ClientId,
        /// Why the loop stopped.
        reason: SessionEnd,
    },
}
