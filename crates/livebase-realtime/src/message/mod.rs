//! Messages pushed to realtime clients.

pub mod types;

pub use types::{CONNECT_TOPIC, ConnectPayload, Message, RecordChangePayload};
