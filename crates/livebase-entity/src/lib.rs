//! # livebase-entity
//!
//! Domain entity models for Livebase. The bridge tables
//! (`realtime_client_subscriptions`, `realtime_channel_leases`,
//! `realtime_message_spool`) each have a row struct deriving
//! `sqlx::FromRow`; the record and collection types describe the data the
//! broadcaster fans out.

pub mod channel;
pub mod record;
pub mod spool;
pub mod subscription;
