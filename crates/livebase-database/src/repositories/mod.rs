//! Repositories for the realtime bridge tables.

pub mod channel_lease;
pub mod client_subscription;
pub mod message_spool;

pub use channel_lease::ChannelLeaseRepository;
pub use client_subscription::ClientSubscriptionRepository;
pub use message_spool::MessageSpoolRepository;
