//! Record change fan-out.

pub mod broadcaster;
pub mod dry_cache;
pub mod projection;
pub mod topics;

pub use broadcaster::RecordChangeBroadcaster;
pub use dry_cache::DryCache;
pub use topics::{RuleKind, TopicPrefix};
