//! Error types for the geomerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Merge failures come in two tiers. Irreconcilable object differences are
//! *not* errors: they are recorded in a [`ConflictSet`](crate::conflict::ConflictSet)
//! and the merge still succeeds. Only data-integrity problems and contract
//! violations between merge passes surface as [`MergeError`].

use thiserror::Error;

use crate::primitive::{PrimitiveId, PrimitiveKind};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

/// Errors from the object graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An object with the same identity is already part of the graph.
    #[error("{0} already exists in the graph")]
    Duplicate(PrimitiveId),

    /// The requested object is not part of the graph.
    #[error("{0} not found in the graph")]
    NotFound(PrimitiveId),

    /// A structural reference names an object absent from the graph.
    #[error("{owner} references {target}, which is not in the graph")]
    DanglingReference {
        owner: PrimitiveId,
        target: PrimitiveId,
    },

    /// A path may only reference points.
    #[error("{owner} may not reference {target}: paths only hold points")]
    InvalidReference {
        owner: PrimitiveId,
        target: PrimitiveId,
    },

    /// The object cannot be removed or deleted while others still reference it.
    #[error("{id} is still referenced by {count} object(s)")]
    HasReferrers { id: PrimitiveId, count: usize },

    /// A structural operation was applied to the wrong kind of object.
    #[error("{id} is a {actual}, expected a {expected}")]
    KindMismatch {
        id: PrimitiveId,
        expected: PrimitiveKind,
        actual: PrimitiveKind,
    },

    /// Every negative id below the lowest id in the graph is taken.
    #[error("no new ids left to allocate")]
    NewIdsExhausted,
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict store and conflict resolution.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A conflict naming the same "my" object has already been recorded.
    #[error("a conflict for {0} is already recorded")]
    Duplicate(PrimitiveId),

    /// Both sides of a conflict must be of the same kind.
    #[error("conflict sides differ in kind: mine is {mine}, theirs is {theirs}")]
    KindMismatch {
        mine: PrimitiveKind,
        theirs: PrimitiveKind,
    },

    /// No conflict exists for the given object.
    #[error("no conflict recorded for {0}")]
    NotFound(PrimitiveId),

    /// A resolution was requested without a decision.
    #[error("cannot resolve undecided conflict for {0}")]
    Undecided(PrimitiveId),

    /// The property being resolved does not exist on this kind of object.
    #[error("{id} has no {property} to resolve")]
    NotApplicable {
        id: PrimitiveId,
        property: &'static str,
    },

    /// Graph error when applying a resolution.
    #[error("conflict graph error: {0}")]
    GraphError(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Fatal errors that abort a merge run.
///
/// When [`GraphMerger::merge`](crate::merger::GraphMerger::merge) returns one
/// of these, the target graph and the conflict set are left exactly as they
/// were before the run.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Both graphs carry the same version of an object but disagree on its
    /// visibility. The inputs cannot be reconciled automatically.
    #[error("conflict in 'visible' attribute for {id} at version {version}")]
    VisibilityMismatch { id: PrimitiveId, version: u64 },

    /// A source object that needs its references repaired has no merge target.
    #[error("missing merge target for {0}")]
    MissingMergeTarget(PrimitiveId),

    /// An object marked for deletion has no counterpart in the source graph.
    #[error("{0} was marked to be deleted, but it is missing in the source graph")]
    MissingDeletionSource(PrimitiveId),

    /// Graph contract violation while applying merge results.
    #[error("merge graph error: {0}")]
    GraphError(#[from] GraphError),

    /// Conflict store contract violation while recording conflicts.
    #[error("merge conflict store error: {0}")]
    ConflictError(#[from] ConflictError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

/// Errors from reading and writing graph snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Snapshot file not found.
    #[error("snapshot file not found: {0}")]
    FileNotFound(String),

    /// JSON (de)serialization failure.
    #[error("snapshot parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The snapshot describes an inconsistent graph.
    #[error("snapshot graph error: {0}")]
    GraphError(#[from] GraphError),

    /// Generic I/O wrapper.
    #[error("snapshot I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MergeError::VisibilityMismatch {
            id: PrimitiveId::new(PrimitiveKind::Point, 7),
            version: 3,
        };
        assert_eq!(
            err.to_string(),
            "conflict in 'visible' attribute for point 7 at version 3"
        );

        let err = GraphError::HasReferrers {
            id: PrimitiveId::new(PrimitiveKind::Point, 1),
            count: 2,
        };
        assert_eq!(err.to_string(), "point 1 is still referenced by 2 object(s)");

        let err = ConfigError::InvalidValue {
            field: "logging.level".into(),
            detail: "unknown level".into(),
        };
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let merge_err = MergeError::MissingMergeTarget(PrimitiveId::new(PrimitiveKind::Path, 4));
        let core_err: CoreError = merge_err.into();
        assert!(matches!(core_err, CoreError::Merge(_)));

        let graph_err = GraphError::NotFound(PrimitiveId::new(PrimitiveKind::Group, 9));
        let merge_err: MergeError = graph_err.into();
        assert!(matches!(merge_err, MergeError::GraphError(_)));
    }
}
