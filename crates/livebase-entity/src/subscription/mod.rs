//! Persisted client subscription entities.

pub mod model;

pub use model::ClientSubscription;
