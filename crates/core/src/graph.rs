//! The object graph: points, paths and groups indexed by identity.
//!
//! Besides the primitives themselves the [`Graph`] maintains a back-reference
//! index (child identity to the set of paths/groups referencing it) that is
//! updated incrementally whenever structure changes. All structural mutation
//! goes through the graph so the index can never drift.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::GraphError;
use crate::primitive::{Body, Member, Primitive, PrimitiveId, PrimitiveKind};

/// A structural reference to an identity that is not in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub owner: PrimitiveId,
    pub target: PrimitiveId,
}

/// Collection of primitives with a maintained referrer index.
#[derive(Debug, Clone)]
pub struct Graph {
    primitives: BTreeMap<PrimitiveId, Primitive>,
    referrers: HashMap<PrimitiveId, BTreeSet<PrimitiveId>>,
    /// Next id handed out to a new primitive; always negative. `None` once
    /// the id space below the lowest id is used up.
    next_new_id: Option<i64>,
    /// Nesting depth of batch updates in progress.
    update_depth: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            primitives: BTreeMap::new(),
            referrers: HashMap::new(),
            next_new_id: Some(-1),
            update_depth: 0,
        }
    }

    /// Build a graph from primitives in any order.
    ///
    /// Every primitive is inserted without its structure first, then point
    /// lists and member lists are attached, so groups may reference each
    /// other in cycles. Every reference must name a primitive in the input.
    pub fn from_primitives<I>(primitives: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Primitive>,
    {
        let mut graph = Self::new();
        let mut structure = Vec::new();
        for mut primitive in primitives {
            let body = primitive.body().clone();
            primitive.clear_references();
            let id = graph.add(primitive)?;
            structure.push((id, body));
        }
        for (id, body) in structure {
            match body {
                Body::Point { .. } => {}
                Body::Path { points } => graph.set_points(id, points)?,
                Body::Group { members } => graph.set_members(id, members)?,
            }
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn contains(&self, id: PrimitiveId) -> bool {
        self.primitives.contains_key(&id)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.primitives.get(&id)
    }

    pub fn get_by_id(&self, kind: PrimitiveKind, id: i64) -> Option<&Primitive> {
        self.get(PrimitiveId::new(kind, id))
    }

    /// Mutable access to a primitive's attributes.
    ///
    /// Structure (point lists, member lists) can only be changed through
    /// [`set_points`](Self::set_points), [`set_members`](Self::set_members)
    /// and [`clear_references`](Self::clear_references).
    pub fn get_mut(&mut self, id: PrimitiveId) -> Option<&mut Primitive> {
        self.primitives.get_mut(&id)
    }

    /// All primitives of one kind, ordered by id.
    pub fn all_of(&self, kind: PrimitiveKind) -> impl Iterator<Item = &Primitive> + '_ {
        self.primitives
            .range(PrimitiveId::new(kind, i64::MIN)..=PrimitiveId::new(kind, i64::MAX))
            .map(|(_, p)| p)
    }

    /// All primitives: points, then paths, then groups.
    pub fn iter(&self) -> impl Iterator<Item = &Primitive> + '_ {
        self.primitives.values()
    }

    /// Paths and groups that reference `id`, ordered by identity.
    pub fn referrers_of(&self, id: PrimitiveId) -> Vec<PrimitiveId> {
        self.referrers
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_referrers(&self, id: PrimitiveId) -> bool {
        self.referrers.get(&id).is_some_and(|set| !set.is_empty())
    }

    /// Referrers of `id` that are not deleted themselves.
    ///
    /// A deleted path or group may still carry its structure, but it no
    /// longer keeps its children alive.
    pub fn live_referrers_of(&self, id: PrimitiveId) -> Vec<PrimitiveId> {
        self.referrers
            .get(&id)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|r| self.primitives.get(r).is_some_and(|p| !p.is_deleted()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Point identities ordered by coordinate; points without a coordinate
    /// come last.
    pub fn points_by_position(&self) -> Vec<PrimitiveId> {
        let mut points: Vec<&Primitive> = self.all_of(PrimitiveKind::Point).collect();
        points.sort_by(|a, b| match (a.coordinate(), b.coordinate()) {
            (Some(x), Some(y)) => x.cmp_position(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        points.into_iter().map(Primitive::primitive_id).collect()
    }

    // -----------------------------------------------------------------------
    // Add / remove
    // -----------------------------------------------------------------------

    /// Hand out a fresh id for a new primitive.
    pub fn allocate_new_id(&mut self) -> Result<i64, GraphError> {
        let id = self.next_new_id.ok_or(GraphError::NewIdsExhausted)?;
        self.next_new_id = id.checked_sub(1);
        Ok(id)
    }

    /// Add a primitive and index its references.
    ///
    /// A primitive with id `0` is assigned a fresh negative id. Every
    /// referenced identity must already be in the graph.
    pub fn add(&mut self, mut primitive: Primitive) -> Result<PrimitiveId, GraphError> {
        if primitive.id() == 0 {
            let id = self.allocate_new_id()?;
            primitive.set_id(id);
        } else if self.next_new_id.is_some_and(|next| primitive.id() <= next) {
            self.next_new_id = primitive.id().checked_sub(1);
        }

        let id = primitive.primitive_id();
        if self.primitives.contains_key(&id) {
            return Err(GraphError::Duplicate(id));
        }

        let references = primitive.references();
        self.validate_references(id, &references)?;
        self.index(id, &references);
        self.primitives.insert(id, primitive);
        Ok(id)
    }

    /// Remove a primitive.
    ///
    /// Fails with [`GraphError::HasReferrers`] while any path or group still
    /// references it; callers must detach it first.
    pub fn remove(&mut self, id: PrimitiveId) -> Result<Primitive, GraphError> {
        if !self.primitives.contains_key(&id) {
            return Err(GraphError::NotFound(id));
        }
        let count = self.referrers.get(&id).map_or(0, BTreeSet::len);
        if count > 0 {
            return Err(GraphError::HasReferrers { id, count });
        }

        let primitive = self
            .primitives
            .remove(&id)
            .ok_or(GraphError::NotFound(id))?;
        self.unindex(id, &primitive.references());
        self.referrers.remove(&id);
        Ok(primitive)
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Replace the point list of a path.
    pub fn set_points(&mut self, id: PrimitiveId, points: Vec<PrimitiveId>) -> Result<(), GraphError> {
        self.expect_kind(id, PrimitiveKind::Path)?;
        self.validate_references(id, &points)?;
        let references = points.clone();
        self.replace_structure(id, &references, move |p| p.replace_points(points))
    }

    /// Replace the member list of a group.
    pub fn set_members(&mut self, id: PrimitiveId, members: Vec<Member>) -> Result<(), GraphError> {
        self.expect_kind(id, PrimitiveKind::Group)?;
        let references: Vec<PrimitiveId> = members.iter().map(|m| m.member).collect();
        self.validate_references(id, &references)?;
        self.replace_structure(id, &references, move |p| p.replace_members(members))
    }

    /// Detach all points of a path or members of a group. No-op for points.
    pub fn clear_references(&mut self, id: PrimitiveId) -> Result<(), GraphError> {
        self.replace_structure(id, &[], Primitive::clear_references)
    }

    /// Every structural reference to an identity absent from the graph.
    pub fn check_references(&self) -> Vec<DanglingReference> {
        self.primitives
            .values()
            .flat_map(|owner| {
                owner
                    .references()
                    .into_iter()
                    .filter(|target| !self.primitives.contains_key(target))
                    .map(move |target| DanglingReference {
                        owner: owner.primitive_id(),
                        target,
                    })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Batch updates
    // -----------------------------------------------------------------------

    pub fn begin_update(&mut self) {
        self.update_depth += 1;
        debug!(depth = self.update_depth, "batch update started");
    }

    pub fn end_update(&mut self) {
        self.update_depth = self.update_depth.saturating_sub(1);
        debug!(depth = self.update_depth, "batch update finished");
    }

    /// Whether a batch update is in progress.
    pub fn is_updating(&self) -> bool {
        self.update_depth > 0
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn expect_kind(&self, id: PrimitiveId, expected: PrimitiveKind) -> Result<(), GraphError> {
        let primitive = self.primitives.get(&id).ok_or(GraphError::NotFound(id))?;
        if primitive.kind() != expected {
            return Err(GraphError::KindMismatch {
                id,
                expected,
                actual: primitive.kind(),
            });
        }
        Ok(())
    }

    fn validate_references(&self, owner: PrimitiveId, references: &[PrimitiveId]) -> Result<(), GraphError> {
        for &target in references {
            if owner.kind == PrimitiveKind::Path && target.kind != PrimitiveKind::Point {
                return Err(GraphError::InvalidReference { owner, target });
            }
            if target != owner && !self.primitives.contains_key(&target) {
                return Err(GraphError::DanglingReference { owner, target });
            }
        }
        Ok(())
    }

    fn replace_structure<F>(&mut self, id: PrimitiveId, new_refs: &[PrimitiveId], apply: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut Primitive),
    {
        let primitive = self.primitives.get_mut(&id).ok_or(GraphError::NotFound(id))?;
        let old_refs = primitive.references();
        apply(primitive);
        self.unindex(id, &old_refs);
        self.index(id, new_refs);
        Ok(())
    }

    fn index(&mut self, owner: PrimitiveId, references: &[PrimitiveId]) {
        for target in references {
            self.referrers.entry(*target).or_default().insert(owner);
        }
    }

    fn unindex(&mut self, owner: PrimitiveId, references: &[PrimitiveId]) {
        for target in references {
            if let Some(set) = self.referrers.get_mut(target) {
                set.remove(&owner);
                if set.is_empty() {
                    self.referrers.remove(target);
                }
            }
        }
    }
}
