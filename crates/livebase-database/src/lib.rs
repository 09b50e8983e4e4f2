//! # livebase-database
//!
//! PostgreSQL connection management, migrations, the `pg_notify` helper,
//! and repositories for the three realtime bridge tables.

pub mod connection;
pub mod migration;
pub mod notify;
pub mod repositories;

pub use connection::DatabasePool;
pub use notify::MAX_NOTIFY_PAYLOAD_BYTES;
