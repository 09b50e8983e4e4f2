//! Channel (server instance) lease entities.

pub mod model;

pub use model::ChannelLease;
