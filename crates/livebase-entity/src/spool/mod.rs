//! Spooled bridge messages.

pub mod model;

pub use model::SpooledMessage;
