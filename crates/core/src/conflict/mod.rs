//! Conflict recording and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Recording** -- collecting (mine, theirs) pairs the merger could not
//!    reconcile automatically.
//! 2. **Resolution** -- applying per-property decisions (coordinates, deleted
//!    state, visible state, tags) to the merged graph.

pub mod resolver;
pub mod set;

pub use resolver::{ConflictResolver, MergeDecision, PropertyDiff};
pub use set::{Conflict, ConflictSet, Side};
