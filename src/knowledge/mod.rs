//! Knowledge refinery: content hashing, per-file knowledge persistence,
//! lifecycle reconciliation and intent annotation.

pub mod hash;
pub mod intent;
pub mod refinery;
pub mod store;

pub use hash::calculate_hash;
pub use intent::{IntentGenerator, IntentManager, PlaceholderIntent};
pub use refinery::{FileFailure, KnowledgeRefinery, RefineReport, reconcile};
pub use store::KnowledgeStore;
