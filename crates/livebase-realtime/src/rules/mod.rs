//! Access rule evaluation, expansion, and identity rehydration seams.

pub mod context;
pub mod evaluator;
pub mod expand;
pub mod identity;

pub use context::RequestInfo;
pub use evaluator::{BasicRuleEvaluator, RuleEvaluator};
pub use expand::{NoopExpander, RecordExpander};
pub use identity::IdentityRehydrator;
