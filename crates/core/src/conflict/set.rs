//! The conflict store.
//!
//! A [`ConflictSet`] is an ordered collection of [`Conflict`]s. Each conflict
//! pairs an object of the merged graph ("mine") with a snapshot of the object
//! from the source graph ("theirs"). At most one conflict may name a given
//! "mine" object.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::ConflictError;
use crate::primitive::{Primitive, PrimitiveId};

/// Which side of a conflict a query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Mine,
    Theirs,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mine => write!(f, "mine"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// An unresolved disagreement between a target object and a source object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique conflict ID.
    pub id: String,
    mine: PrimitiveId,
    theirs: Primitive,
    /// Whether "my" side's referrer information applies.
    is_my_side: bool,
}

impl Conflict {
    /// Create a new conflict with a fresh UUID.
    pub fn new(mine: PrimitiveId, theirs: Primitive, is_my_side: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mine,
            theirs,
            is_my_side,
        }
    }

    /// Identity of the object in the merged graph.
    pub fn mine(&self) -> PrimitiveId {
        self.mine
    }

    /// The source object as it was when the conflict was recorded.
    pub fn theirs(&self) -> &Primitive {
        &self.theirs
    }

    pub fn is_my_side(&self) -> bool {
        self.is_my_side
    }

    /// Whether this conflict names `id` on the given side.
    pub fn names(&self, id: PrimitiveId, side: Side) -> bool {
        match side {
            Side::Mine => self.mine == id,
            Side::Theirs => self.theirs.primitive_id() == id,
        }
    }
}

/// Ordered collection of conflicts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictSet {
    conflicts: Vec<Conflict>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a conflict between `mine` and `theirs`.
    ///
    /// Fails if a conflict for `mine` already exists or if the two sides are
    /// of different kinds.
    pub fn add(&mut self, mine: PrimitiveId, theirs: &Primitive, is_my_side: bool) -> Result<(), ConflictError> {
        if mine.kind != theirs.kind() {
            return Err(ConflictError::KindMismatch {
                mine: mine.kind,
                theirs: theirs.kind(),
            });
        }
        if self.has_conflict_for(mine, Side::Mine) {
            return Err(ConflictError::Duplicate(mine));
        }
        debug!(%mine, theirs = %theirs.primitive_id(), is_my_side, "conflict added");
        self.conflicts.push(Conflict::new(mine, theirs.clone(), is_my_side));
        Ok(())
    }

    /// Whether a conflict names `id` on the given side.
    pub fn has_conflict_for(&self, id: PrimitiveId, side: Side) -> bool {
        self.conflicts.iter().any(|c| c.names(id, side))
    }

    pub fn get_for_my(&self, id: PrimitiveId) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.mine == id)
    }

    /// Drop the conflict for `id` once it has been resolved.
    pub fn remove_for_my(&mut self, id: PrimitiveId) -> Result<Conflict, ConflictError> {
        let index = self
            .conflicts
            .iter()
            .position(|c| c.mine == id)
            .ok_or(ConflictError::NotFound(id))?;
        Ok(self.conflicts.remove(index))
    }

    /// All conflicts in the order they were recorded.
    pub fn all(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> + '_ {
        self.conflicts.iter()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn clear(&mut self) {
        self.conflicts.clear();
    }
}
