//! geomerge core library.
//!
//! This crate provides the building blocks for merging one point/path/group
//! dataset into another: the object model, the in-memory graph, the conflict
//! store and resolver, the three-pass merger, configuration and JSON snapshots.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod graph;
pub mod merger;
pub mod primitive;
pub mod snapshot;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{Conflict, ConflictResolver, ConflictSet, MergeDecision, Side};
pub use errors::CoreError;
pub use graph::Graph;
pub use merger::{GraphMerger, MergeStats};
pub use primitive::{Coordinate, Member, Primitive, PrimitiveId, PrimitiveKind, User};
