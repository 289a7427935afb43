//! Conflict resolution actions.
//!
//! The [`ConflictResolver`] compares the two sides of a recorded conflict
//! property by property and applies a [`MergeDecision`] for each property to
//! "my" object in the merged graph.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::set::{Conflict, ConflictSet};
use crate::errors::{ConflictError, GraphError};
use crate::graph::Graph;
use crate::primitive::{Primitive, PrimitiveId, PrimitiveKind};

/// Decision for one conflicting property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    #[default]
    Undecided,
    /// Keep the value of my object.
    KeepMine,
    /// Take the value of their object.
    KeepTheir,
}

/// Which properties differ between the two sides of a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub coordinates_differ: bool,
    pub deleted_state_differs: bool,
    pub visible_state_differs: bool,
    /// Tag keys whose values differ or that exist on one side only.
    pub differing_tags: BTreeSet<String>,
}

impl PropertyDiff {
    pub fn is_empty(&self) -> bool {
        !self.coordinates_differ
            && !self.deleted_state_differs
            && !self.visible_state_differs
            && self.differing_tags.is_empty()
    }
}

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Compare my object in `graph` with their snapshot in `conflict`.
    pub fn analyze(conflict: &Conflict, graph: &Graph) -> Result<PropertyDiff, ConflictError> {
        let mine = my_object(conflict, graph)?;
        let theirs = conflict.theirs();

        let coordinates_differ = match (mine.coordinate(), theirs.coordinate()) {
            (Some(a), Some(b)) => !a.equals_epsilon(&b),
            (None, None) => false,
            _ => mine.kind() == PrimitiveKind::Point,
        };

        let keys: BTreeSet<&String> = mine.tags().keys().chain(theirs.tags().keys()).collect();
        let differing_tags = keys
            .into_iter()
            .filter(|k| mine.tags().get(*k) != theirs.tags().get(*k))
            .cloned()
            .collect();

        Ok(PropertyDiff {
            coordinates_differ,
            deleted_state_differs: mine.is_deleted() != theirs.is_deleted(),
            visible_state_differs: mine.is_visible() != theirs.is_visible(),
            differing_tags,
        })
    }

    /// Resolve a coordinate conflict between two points.
    pub fn resolve_coordinates(
        conflict: &Conflict,
        graph: &mut Graph,
        decision: MergeDecision,
    ) -> Result<(), ConflictError> {
        let id = conflict.mine();
        if id.kind != PrimitiveKind::Point {
            return Err(ConflictError::NotApplicable {
                id,
                property: "coordinates",
            });
        }
        if !decide(id, decision)? {
            return Ok(());
        }
        info!(%id, "resolving coordinates: keep theirs");
        let mine = my_object_mut(conflict, graph)?;
        mine.set_coordinate(conflict.theirs().coordinate())?;
        mine.set_modified(true);
        Ok(())
    }

    /// Resolve a conflict between two deleted states.
    ///
    /// Taking their deleted state is refused while a path or group that is
    /// not deleted itself still references my object.
    pub fn resolve_deleted_state(
        conflict: &Conflict,
        graph: &mut Graph,
        decision: MergeDecision,
    ) -> Result<(), ConflictError> {
        let id = conflict.mine();
        if !decide(id, decision)? {
            return Ok(());
        }
        let deleted = conflict.theirs().is_deleted();
        if deleted {
            let count = graph.live_referrers_of(id).len();
            if count > 0 {
                return Err(GraphError::HasReferrers { id, count }.into());
            }
        }
        info!(%id, deleted, "resolving deleted state: keep theirs");
        let mine = my_object_mut(conflict, graph)?;
        if mine.is_deleted() != deleted {
            mine.set_deleted(deleted);
            mine.set_modified(true);
        }
        Ok(())
    }

    /// Resolve a conflict between two visible states.
    pub fn resolve_visible_state(
        conflict: &Conflict,
        graph: &mut Graph,
        decision: MergeDecision,
    ) -> Result<(), ConflictError> {
        let id = conflict.mine();
        if !decide(id, decision)? {
            return Ok(());
        }
        let visible = conflict.theirs().is_visible();
        info!(%id, visible, "resolving visible state: keep theirs");
        let mine = my_object_mut(conflict, graph)?;
        mine.set_visible(visible);
        if !visible {
            let deleted = mine.is_deleted();
            mine.set_modified(!deleted);
        }
        Ok(())
    }

    /// Resolve a tag conflict by keeping either side's complete tag set.
    pub fn resolve_tags(
        conflict: &Conflict,
        graph: &mut Graph,
        decision: MergeDecision,
    ) -> Result<(), ConflictError> {
        let id = conflict.mine();
        if !decide(id, decision)? {
            return Ok(());
        }
        info!(%id, "resolving tags: keep theirs");
        let mine = my_object_mut(conflict, graph)?;
        mine.set_tags(conflict.theirs().tags().clone());
        mine.set_modified(true);
        Ok(())
    }

    /// Remove the conflict for `id` from `conflicts` once all its properties
    /// have been resolved.
    pub fn mark_resolved(conflicts: &mut ConflictSet, id: PrimitiveId) -> Result<Conflict, ConflictError> {
        let conflict = conflicts.remove_for_my(id)?;
        debug!(%id, conflict_id = %conflict.id, "conflict resolved");
        Ok(conflict)
    }
}

/// `Ok(true)` when their value must be applied, `Ok(false)` to keep mine.
fn decide(id: PrimitiveId, decision: MergeDecision) -> Result<bool, ConflictError> {
    match decision {
        MergeDecision::Undecided => Err(ConflictError::Undecided(id)),
        MergeDecision::KeepMine => Ok(false),
        MergeDecision::KeepTheir => Ok(true),
    }
}

fn my_object<'g>(conflict: &Conflict, graph: &'g Graph) -> Result<&'g Primitive, ConflictError> {
    graph
        .get(conflict.mine())
        .ok_or_else(|| GraphError::NotFound(conflict.mine()).into())
}

fn my_object_mut<'g>(conflict: &Conflict, graph: &'g mut Graph) -> Result<&'g mut Primitive, ConflictError> {
    graph
        .get_mut(conflict.mine())
        .ok_or_else(|| GraphError::NotFound(conflict.mine()).into())
}
