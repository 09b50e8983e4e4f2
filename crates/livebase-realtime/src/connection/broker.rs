//! Directory of every client this instance can reach.

use std::sync::Arc;

use dashmap::DashMap;

use livebase_core::types::ClientId;

use crate::bridge::BridgedClient;

/// Local clients and mirrors of remote ones, keyed by client id.
///
/// Read on every broadcast, written on connect, disconnect and bridge
/// notifications.
#[derive(Debug, Default)]
pub struct Broker {
    clients: DashMap<ClientId, Arc<BridgedClient>>,
}

impl Broker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Returns the client previously stored under the same
    /// id, if any.
    pub fn register(&self, client: Arc<BridgedClient>) -> Option<Arc<BridgedClient>> {
        self.clients.insert(client.id(), client)
    }

    /// Remove a client and return it.
    pub fn unregister(&self, client_id: ClientId) -> Option<Arc<BridgedClient>> {
        self.clients.remove(&client_id).map(|(_, client)| client)
    }

    /// Look up a client.
    pub fn client_by_id(&self, client_id: ClientId) -> Option<Arc<BridgedClient>> {
        self.clients
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All clients, local and remote.
    pub fn clients(&self) -> Vec<Arc<BridgedClient>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Clients whose connection lives on this instance.
    pub fn local_clients(&self) -> Vec<Arc<BridgedClient>> {
        self.clients
            .iter()
            .filter(|entry| !entry.value().is_remote())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of clients, local and remote.
    pub fn total_clients(&self) -> usize {
        self.clients.len()
    }

    /// Number of local clients.
    pub fn total_local_clients(&self) -> usize {
        self.clients
            .iter()
            .filter(|entry| !entry.value().is_remote())
            .count()
    }
}
