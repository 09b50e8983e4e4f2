//! Records, their collections, and the collection registry.

pub mod action;
pub mod collection;
pub mod model;
pub mod registry;

pub use action::RecordAction;
pub use collection::{Collection, CollectionKind};
pub use model::Record;
pub use registry::CollectionRegistry;
