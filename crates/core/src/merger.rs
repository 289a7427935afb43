//! Two-way graph merge engine.
//!
//! The [`GraphMerger`] merges a *source* graph onto a *target* graph. A run
//! has three passes:
//!
//! 1. Per-object disposition for every source object, points first, then
//!    paths, then groups: merge by id, match a semantically equal new object,
//!    clone, mark for deletion, or record a conflict.
//! 2. Reference repair: rebuild the point lists of paths and member lists of
//!    groups so they name target objects.
//! 3. Cascading deletion of objects the source deleted, down to a fixed point.
//!
//! A run works on a copy of the target graph and the conflict set and only
//! commits them when it completes. A fatal [`MergeError`] therefore leaves
//! both exactly as they were.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::{ConflictSet, Side};
use crate::errors::{GraphError, MergeError};
use crate::graph::Graph;
use crate::primitive::{Member, Primitive, PrimitiveId, PrimitiveKind};

/// Counters collected during a merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Source objects merged onto a target object with the same id.
    pub merged_by_id: usize,
    /// New source objects matched to a semantically equal new target object.
    pub matched_new: usize,
    /// Source objects cloned into the target graph.
    pub cloned: usize,
    /// Deleted new source objects that were ignored.
    pub skipped: usize,
    /// Target objects deleted by the deletion cascade.
    pub deleted: usize,
    /// Of `deleted`, objects in reference cycles whose structure was cleared first.
    pub force_deleted: usize,
    /// Conflicts recorded during the run.
    pub conflicts: usize,
}

/// Merges a source graph onto a target graph.
pub struct GraphMerger<'s> {
    target: Graph,
    source: &'s Graph,
    conflicts: ConflictSet,
    merged_map: HashMap<PrimitiveId, PrimitiveId>,
    stats: MergeStats,
}

impl<'s> GraphMerger<'s> {
    pub fn new(target: Graph, source: &'s Graph) -> Self {
        Self::with_conflicts(target, source, ConflictSet::new())
    }

    /// Create a merger that appends to an existing conflict set.
    pub fn with_conflicts(target: Graph, source: &'s Graph, conflicts: ConflictSet) -> Self {
        Self {
            target,
            source,
            conflicts,
            merged_map: HashMap::new(),
            stats: MergeStats::default(),
        }
    }

    /// Run the merge.
    ///
    /// Irreconcilable differences are recorded as conflicts and do not fail
    /// the merge. On `Err` the target graph and conflict set are unchanged.
    pub fn merge(&mut self) -> Result<(), MergeError> {
        info!(
            target_objects = self.target.len(),
            source_objects = self.source.len(),
            "merging graphs"
        );

        let mut run = MergeRun::new(self.target.clone(), self.source, self.conflicts.clone());
        run.target.begin_update();
        let result = run.execute();
        run.target.end_update();

        match result {
            Ok(()) => {
                let MergeRun {
                    target,
                    conflicts,
                    merged_map,
                    stats,
                    ..
                } = run;
                info!(
                    merged_by_id = stats.merged_by_id,
                    matched_new = stats.matched_new,
                    cloned = stats.cloned,
                    deleted = stats.deleted,
                    conflicts = stats.conflicts,
                    "merge complete"
                );
                self.target = target;
                self.conflicts = conflicts;
                self.merged_map = merged_map;
                self.stats = stats;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "merge aborted, target graph left unchanged");
                Err(e)
            }
        }
    }

    /// The merged graph (the untouched target before [`merge`](Self::merge)).
    pub fn result_graph(&self) -> &Graph {
        &self.target
    }

    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// The target identity a source object was merged into by the last run.
    pub fn merge_target(&self, source_id: PrimitiveId) -> Option<PrimitiveId> {
        self.merged_map.get(&source_id).copied()
    }

    /// Consume the merger, returning the merged graph and the conflicts.
    pub fn into_parts(self) -> (Graph, ConflictSet) {
        (self.target, self.conflicts)
    }
}

// ---------------------------------------------------------------------------
// Working state of one run
// ---------------------------------------------------------------------------

struct MergeRun<'s> {
    target: Graph,
    source: &'s Graph,
    conflicts: ConflictSet,
    /// Source identity to the target identity it was merged into or cloned as.
    merged_map: HashMap<PrimitiveId, PrimitiveId>,
    /// Source paths/groups whose structure must be rebuilt in pass 2.
    children_to_merge: HashSet<PrimitiveId>,
    /// Target objects the source deleted, pending the cascade in pass 3.
    objects_to_delete: BTreeSet<PrimitiveId>,
    /// New target objects already matched to a new source object.
    claimed: HashSet<PrimitiveId>,
    stats: MergeStats,
}

impl<'s> MergeRun<'s> {
    fn new(target: Graph, source: &'s Graph, conflicts: ConflictSet) -> Self {
        Self {
            target,
            source,
            conflicts,
            merged_map: HashMap::new(),
            children_to_merge: HashSet::new(),
            objects_to_delete: BTreeSet::new(),
            claimed: HashSet::new(),
            stats: MergeStats::default(),
        }
    }

    fn execute(&mut self) -> Result<(), MergeError> {
        let source = self.source;
        for kind in PrimitiveKind::ALL {
            for primitive in source.all_of(kind) {
                self.merge_primitive(primitive)?;
            }
        }
        self.fix_references()
    }

    // -----------------------------------------------------------------------
    // Pass 1: per-object disposition
    // -----------------------------------------------------------------------

    fn merge_primitive(&mut self, source: &Primitive) -> Result<(), MergeError> {
        let source_id = source.primitive_id();

        if !source.is_new() {
            if self.merge_by_id(source)? {
                self.stats.merged_by_id += 1;
                return Ok(());
            }
        } else {
            if source.is_deleted() {
                debug!(id = %source_id, "skipping deleted new object");
                self.stats.skipped += 1;
                return Ok(());
            }
            if let Some(target_id) = self.find_equal_new(source) {
                debug!(source = %source_id, target = %target_id, "matched new object");
                self.merged_map.insert(source_id, target_id);
                self.claimed.insert(target_id);
                let target = self.target_mut(target_id)?;
                target.set_visible(source.is_visible());
                target.set_user(source.user().cloned());
                target.set_timestamp(source.timestamp());
                target.set_modified(source.is_modified());
                self.children_to_merge.insert(source_id);
                self.stats.matched_new += 1;
                return Ok(());
            }
        }

        // No suitable target object: clone the source object.
        let id = if source.is_new() {
            self.target.allocate_new_id()?
        } else {
            source.id()
        };
        let mut clone = Primitive::empty(source.kind(), id);
        clone.merge_from(source);
        let target_id = self.target.add(clone)?;
        debug!(source = %source_id, target = %target_id, "cloned object");
        self.merged_map.insert(source_id, target_id);
        self.children_to_merge.insert(source_id);
        self.stats.cloned += 1;
        Ok(())
    }

    /// A new, non-deleted, not yet claimed target object semantically equal
    /// to `source`.
    fn find_equal_new(&self, source: &Primitive) -> Option<PrimitiveId> {
        let resolve = |id| resolve_reference(&self.merged_map, id);
        self.target
            .all_of(source.kind())
            .filter(|t| t.is_new() && !t.is_deleted() && !self.claimed.contains(&t.primitive_id()))
            .find(|t| t.has_equal_semantic_attributes(source, &resolve))
            .map(Primitive::primitive_id)
    }

    /// Merge `source` onto the target object with the same id.
    ///
    /// Returns `Ok(false)` if there is no such object. The branches are
    /// evaluated in order; each assumes the conditions of all earlier ones
    /// are false.
    fn merge_by_id(&mut self, source: &Primitive) -> Result<bool, MergeError> {
        let id = source.primitive_id();
        let Some(target) = self.target.get(id) else {
            return Ok(false);
        };
        self.merged_map.insert(id, id);

        let t_version = target.version();
        let s_version = source.version();

        if t_version > s_version {
            debug!(%id, t_version, s_version, "target is newer, keeping it");
            return Ok(true);
        }

        if target.is_incomplete() && !source.is_incomplete() {
            debug!(%id, "source completes incomplete target");
            self.adopt(id, source)?;
        } else if !target.is_incomplete() && source.is_incomplete() {
            // Target already has more information.
        } else if target.is_incomplete() && source.is_incomplete() {
            // Both are stubs; the target is kept.
        } else if target.is_visible() != source.is_visible() && t_version == s_version {
            return Err(MergeError::VisibilityMismatch {
                id,
                version: t_version,
            });
        } else if target.is_deleted() && !source.is_deleted() && t_version == s_version {
            // The deleted target wins unless the source has referrers the
            // target graph does not know about.
            let unknown_referrer = self
                .source
                .live_referrers_of(id)
                .into_iter()
                .find(|r| !self.target.contains(*r));
            if let Some(referrer) = unknown_referrer {
                debug!(%id, %referrer, "deleted target is needed by an unknown referrer");
                self.record_conflict(id, source, true)?;
                self.target_mut(id)?.set_deleted(false);
            }
        } else if !target.is_modified() && source.is_deleted() {
            debug!(%id, "source deleted object, scheduling deletion");
            self.objects_to_delete.insert(id);
        } else if !target.is_modified() && source.is_modified() {
            self.adopt(id, source)?;
        } else if !target.is_modified() && !source.is_modified() && t_version == s_version {
            // Refresh anyway so groups without attributes still get their
            // member lists updated.
            self.adopt(id, source)?;
        } else if !target.is_modified() && !source.is_modified() && t_version < s_version {
            self.adopt(id, source)?;
        } else if target.is_modified() && !source.is_modified() && t_version == s_version {
            if self.semantically_equal(id, source) {
                debug!(%id, "local edit equals synced state, clearing modified flag");
                self.target_mut(id)?.set_modified(false);
            }
        } else if source.is_deleted() != target.is_deleted() {
            self.record_conflict(id, source, false)?;
        } else if !self.semantically_equal(id, source) {
            self.record_conflict(id, source, false)?;
        } else {
            self.adopt(id, source)?;
        }
        Ok(true)
    }

    fn semantically_equal(&self, target_id: PrimitiveId, source: &Primitive) -> bool {
        self.target.get(target_id).is_some_and(|t| {
            t.has_equal_semantic_attributes(source, |id| resolve_reference(&self.merged_map, id))
        })
    }

    /// Copy `source` onto the target object and schedule its structure for repair.
    fn adopt(&mut self, target_id: PrimitiveId, source: &Primitive) -> Result<(), MergeError> {
        self.target_mut(target_id)?.merge_from(source);
        self.children_to_merge.insert(source.primitive_id());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pass 2: reference repair
    // -----------------------------------------------------------------------

    fn fix_references(&mut self) -> Result<(), MergeError> {
        let source = self.source;
        for path in source.all_of(PrimitiveKind::Path) {
            if self.needs_children(path) {
                self.merge_point_list(path)?;
            }
        }
        for group in source.all_of(PrimitiveKind::Group) {
            if self.needs_children(group) {
                self.merge_members(group)?;
            }
        }
        self.resolve_deletions()
    }

    fn needs_children(&self, source: &Primitive) -> bool {
        let id = source.primitive_id();
        self.children_to_merge.contains(&id) && !self.conflicts.has_conflict_for(id, Side::Theirs)
    }

    fn merge_point_list(&mut self, source: &Primitive) -> Result<(), MergeError> {
        let target_id = self.require_merge_target(source.primitive_id())?;
        let mut points = Vec::with_capacity(source.points().len());
        for &source_point in source.points() {
            let target_point = self.require_merge_target(source_point)?;
            self.revive_deleted_child(target_point, source_point)?;
            points.push(target_point);
        }
        self.target.set_points(target_id, points)?;
        Ok(())
    }

    fn merge_members(&mut self, source: &Primitive) -> Result<(), MergeError> {
        let target_id = self.require_merge_target(source.primitive_id())?;
        let mut members = Vec::with_capacity(source.members().len());
        for member in source.members() {
            let target_member = self.require_merge_target(member.member)?;
            self.revive_deleted_child(target_member, member.member)?;
            members.push(Member::new(member.role.clone(), target_member));
        }
        self.target.set_members(target_id, members)?;
        Ok(())
    }

    /// A repaired path or group may not reference a deleted object: record a
    /// conflict for it and undelete it.
    fn revive_deleted_child(&mut self, target_id: PrimitiveId, source_id: PrimitiveId) -> Result<(), MergeError> {
        let deleted = self.target.get(target_id).is_some_and(Primitive::is_deleted);
        if !deleted || self.conflicts.has_conflict_for(target_id, Side::Mine) {
            return Ok(());
        }
        let source = self.source;
        let source_child = source.get(source_id).ok_or(GraphError::NotFound(source_id))?;
        self.record_conflict(target_id, source_child, true)?;
        self.target_mut(target_id)?.set_deleted(false);
        Ok(())
    }

    fn require_merge_target(&self, source_id: PrimitiveId) -> Result<PrimitiveId, MergeError> {
        self.merged_map
            .get(&source_id)
            .copied()
            .filter(|id| self.target.contains(*id))
            .ok_or(MergeError::MissingMergeTarget(source_id))
    }

    // -----------------------------------------------------------------------
    // Pass 3: cascading deletion
    // -----------------------------------------------------------------------

    fn resolve_deletions(&mut self) -> Result<(), MergeError> {
        let source = self.source;
        loop {
            let mut changed = false;
            let candidates: Vec<PrimitiveId> = self.objects_to_delete.iter().copied().collect();
            for id in candidates {
                if !self.objects_to_delete.contains(&id) {
                    continue;
                }
                let source_obj = source.get(id).ok_or(MergeError::MissingDeletionSource(id))?;
                let referrers = self.target.live_referrers_of(id);
                if referrers.is_empty() {
                    self.finalize_deletion(id, source_obj)?;
                    self.objects_to_delete.remove(&id);
                    changed = true;
                } else if referrers.iter().any(|r| !self.objects_to_delete.contains(r)) {
                    debug!(%id, "deletion blocked by a live referrer");
                    self.record_conflict(id, source_obj, false)?;
                    self.objects_to_delete.remove(&id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        if self.objects_to_delete.is_empty() {
            return Ok(());
        }

        // Whatever is left only references itself, e.g. groups that are
        // members of each other.
        let remaining: Vec<PrimitiveId> = std::mem::take(&mut self.objects_to_delete).into_iter().collect();
        warn!(count = remaining.len(), "force-deleting objects in reference cycles");
        for &id in &remaining {
            self.target.clear_references(id)?;
        }
        for id in remaining {
            let source_obj = source.get(id).ok_or(MergeError::MissingDeletionSource(id))?;
            self.finalize_deletion(id, source_obj)?;
            self.stats.force_deleted += 1;
        }
        Ok(())
    }

    fn finalize_deletion(&mut self, id: PrimitiveId, source: &Primitive) -> Result<(), MergeError> {
        debug!(%id, "deleting object");
        self.target.clear_references(id)?;
        let target = self.target_mut(id)?;
        target.merge_from(source);
        target.set_deleted(true);
        self.stats.deleted += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn target_mut(&mut self, id: PrimitiveId) -> Result<&mut Primitive, MergeError> {
        self.target
            .get_mut(id)
            .ok_or_else(|| GraphError::NotFound(id).into())
    }

    /// Record a conflict unless one for `mine` already exists.
    fn record_conflict(&mut self, mine: PrimitiveId, theirs: &Primitive, is_my_side: bool) -> Result<(), MergeError> {
        if self.conflicts.has_conflict_for(mine, Side::Mine) {
            debug!(%mine, "conflict already recorded");
            return Ok(());
        }
        warn!(%mine, theirs = %theirs.primitive_id(), is_my_side, "conflict recorded");
        self.conflicts.add(mine, theirs, is_my_side)?;
        self.stats.conflicts += 1;
        Ok(())
    }
}

/// The target identity a source reference stands for.
///
/// Persisted ids are shared by both graphs, so an unmapped one still names
/// the same object. An unmapped new id names nothing in the target.
fn resolve_reference(merged_map: &HashMap<PrimitiveId, PrimitiveId>, id: PrimitiveId) -> Option<PrimitiveId> {
    merged_map
        .get(&id)
        .copied()
        .or_else(|| (!id.is_new()).then_some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Coordinate;

    fn point(id: i64, lat: f64, lon: f64) -> Primitive {
        Primitive::point(id, Coordinate::new(lat, lon))
    }

    fn graph(primitives: Vec<Primitive>) -> Graph {
        Graph::from_primitives(primitives).unwrap()
    }

    fn run(target: Graph, source: &Graph) -> (Graph, ConflictSet, MergeStats) {
        let mut merger = GraphMerger::new(target, source);
        merger.merge().unwrap();
        let stats = merger.stats().clone();
        let (g, c) = merger.into_parts();
        (g, c, stats)
    }

    #[test]
    fn test_target_newer_is_kept() {
        let target = graph(vec![point(1, 1.0, 1.0).with_version(5)]);
        let source = graph(vec![point(1, 2.0, 2.0).with_version(4).with_modified(true)]);
        let (result, conflicts, _) = run(target, &source);
        let p = result.get(PrimitiveId::point(1)).unwrap();
        assert_eq!(p.version(), 5);
        assert_eq!(p.coordinate(), Some(Coordinate::new(1.0, 1.0)));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_source_completes_incomplete_target() {
        let target = graph(vec![Primitive::incomplete(PrimitiveId::point(1))]);
        let source = graph(vec![point(1, 2.0, 2.0).with_version(1).with_tag("k", "v")]);
        let (result, _, _) = run(target, &source);
        let p = result.get(PrimitiveId::point(1)).unwrap();
        assert!(!p.is_incomplete());
        assert_eq!(p.tags().len(), 1);
    }

    #[test]
    fn test_incomplete_source_does_not_override_complete_target() {
        let target = graph(vec![point(1, 2.0, 2.0).with_version(1)]);
        let source = graph(vec![Primitive::incomplete(PrimitiveId::point(1)).with_version(1)]);
        let (result, conflicts, _) = run(target, &source);
        assert!(!result.get(PrimitiveId::point(1)).unwrap().is_incomplete());
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_both_incomplete_keeps_target() {
        let stub = Primitive::incomplete(PrimitiveId::path(4)).with_version(1);
        let target = graph(vec![stub.clone()]);
        let source = graph(vec![Primitive::incomplete(PrimitiveId::path(4))
            .with_version(1)
            .with_tag("highway", "track")]);

        let mut run = MergeRun::new(target, &source, ConflictSet::new());
        run.execute().unwrap();
        assert_eq!(run.target.get(PrimitiveId::path(4)), Some(&stub));
        assert!(run.children_to_merge.is_empty());
        assert!(run.conflicts.is_empty());
        assert_eq!(run.merged_map.get(&PrimitiveId::path(4)), Some(&PrimitiveId::path(4)));
    }

    #[test]
    fn test_missing_merge_target_is_fatal_and_rolls_back() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(1)]);
        let source = graph(vec![
            point(1, 1.0, 1.0).with_version(2),
            point(-1, 0.0, 1.0).with_deleted(true),
            Primitive::path(7, [1, -1]).with_version(1),
        ]);
        let before = target.clone();
        let mut merger = GraphMerger::new(target, &source);
        let result = merger.merge();
        assert!(matches!(result, Err(MergeError::MissingMergeTarget(id)) if id == PrimitiveId::point(-1)));

        let after = merger.result_graph();
        assert_eq!(after.len(), before.len());
        assert!(!after.contains(PrimitiveId::path(7)));
        assert_eq!(after.get(PrimitiveId::point(1)), before.get(PrimitiveId::point(1)));
        assert_eq!(merger.merge_target(PrimitiveId::point(1)), None);
    }

    #[test]
    fn test_visibility_mismatch_is_fatal_and_rolls_back() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(1), point(2, 0.0, 0.0).with_version(2)]);
        let source = graph(vec![
            point(1, 5.0, 5.0).with_version(2),
            point(2, 0.0, 0.0).with_version(2).with_visible(false),
        ]);
        let before = target.clone();
        let mut merger = GraphMerger::new(target, &source);
        let result = merger.merge();
        assert!(matches!(result, Err(MergeError::VisibilityMismatch { version: 2, .. })));
        let after = merger.result_graph();
        assert_eq!(after.get(PrimitiveId::point(1)), before.get(PrimitiveId::point(1)));
        assert_eq!(after.get(PrimitiveId::point(1)).unwrap().version(), 1);
        assert!(!after.is_updating());
        assert!(merger.conflicts().is_empty());
    }

    #[test]
    fn test_deleted_target_wins_when_referrers_known() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(2).with_deleted(true).with_modified(true),
            point(2, 0.0, 1.0).with_version(1),
        ]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2)]);
        let (result, conflicts, _) = run(target, &source);
        assert!(result.get(PrimitiveId::point(1)).unwrap().is_deleted());
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_deleted_target_with_unknown_referrer_conflicts() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_deleted(true).with_modified(true)]);
        let source = graph(vec![
            point(1, 0.0, 0.0).with_version(2),
            point(2, 0.0, 1.0).with_version(1),
            Primitive::path(7, [1, 2]).with_version(1),
        ]);
        let (result, conflicts, _) = run(target, &source);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts.all()[0];
        assert_eq!(conflict.mine(), PrimitiveId::point(1));
        assert!(conflict.is_my_side());
        assert!(!result.get(PrimitiveId::point(1)).unwrap().is_deleted());
        assert_eq!(
            result.get(PrimitiveId::path(7)).unwrap().points(),
            &[PrimitiveId::point(1), PrimitiveId::point(2)]
        );
    }

    #[test]
    fn test_unmodified_target_deleted_by_source() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(1).with_tag("a", "b")]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2).with_deleted(true)]);
        let (result, conflicts, stats) = run(target, &source);
        let p = result.get(PrimitiveId::point(1)).unwrap();
        assert!(p.is_deleted());
        assert_eq!(p.version(), 2);
        assert!(conflicts.is_empty());
        assert_eq!(stats.deleted, 1);
    }

    #[test]
    fn test_deletion_blocked_by_live_referrer() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            point(2, 0.0, 1.0).with_version(1),
            Primitive::path(5, [1, 2]).with_version(1).with_modified(true),
        ]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2).with_deleted(true)]);
        let (result, conflicts, _) = run(target, &source);
        assert!(!result.get(PrimitiveId::point(1)).unwrap().is_deleted());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts.all()[0].mine(), PrimitiveId::point(1));
        assert!(!conflicts.all()[0].is_my_side());
    }

    #[test]
    fn test_deleted_referrer_does_not_block_deletion() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            Primitive::path(5, [1]).with_version(1).with_deleted(true).with_modified(true),
        ]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2).with_deleted(true)]);
        let (result, conflicts, stats) = run(target, &source);
        assert!(result.get(PrimitiveId::point(1)).unwrap().is_deleted());
        assert!(conflicts.is_empty());
        assert_eq!(stats.deleted, 1);
        assert!(result.check_references().is_empty());
    }

    #[test]
    fn test_identical_new_objects_match_one_to_one() {
        let target = graph(vec![point(-1, 3.0, 3.0), point(-2, 3.0, 3.0)]);
        let source = graph(vec![point(-5, 3.0, 3.0), point(-6, 3.0, 3.0)]);
        let mut merger = GraphMerger::new(target, &source);
        merger.merge().unwrap();
        let a = merger.merge_target(PrimitiveId::point(-5)).unwrap();
        let b = merger.merge_target(PrimitiveId::point(-6)).unwrap();
        assert_ne!(a, b);
        assert_eq!(merger.result_graph().len(), 2);
        assert_eq!(merger.stats().matched_new, 2);
    }

    #[test]
    fn test_unmapped_new_reference_is_not_equal() {
        // Source path -3 references a skipped new point whose raw id happens
        // to name a live target point.
        let target = graph(vec![point(-1, 0.0, 0.0), Primitive::path(-2, [-1])]);
        let source = graph(vec![point(-1, 5.0, 5.0).with_deleted(true), Primitive::path(-3, [-1])]);
        let mut run = MergeRun::new(target, &source, ConflictSet::new());
        run.merge_primitive(source.get(PrimitiveId::point(-1)).unwrap()).unwrap();
        let path = source.get(PrimitiveId::path(-3)).unwrap();
        assert_eq!(run.find_equal_new(path), None);
    }

    #[test]
    fn test_deletion_cascades_through_path() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            point(2, 0.0, 1.0).with_version(1),
            Primitive::path(5, [1, 2]).with_version(1),
        ]);
        let source = graph(vec![
            point(1, 0.0, 0.0).with_version(2).with_deleted(true),
            point(2, 0.0, 1.0).with_version(2).with_deleted(true),
            Primitive::path(5, []).with_version(2).with_deleted(true),
        ]);
        let (result, conflicts, stats) = run(target, &source);
        assert!(conflicts.is_empty());
        for id in [PrimitiveId::point(1), PrimitiveId::point(2), PrimitiveId::path(5)] {
            assert!(result.get(id).unwrap().is_deleted(), "{id} not deleted");
            assert!(!result.has_referrers(id));
        }
        assert_eq!(stats.deleted, 3);
        assert_eq!(stats.force_deleted, 0);
    }

    #[test]
    fn test_source_modified_is_adopted() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(3)]);
        let source = graph(vec![point(1, 1.0, 1.0).with_version(3).with_modified(true)]);
        let (result, _, _) = run(target, &source);
        let p = result.get(PrimitiveId::point(1)).unwrap();
        assert_eq!(p.coordinate(), Some(Coordinate::new(1.0, 1.0)));
        assert!(p.is_modified());
    }

    #[test]
    fn test_equal_version_refreshes_group_members() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            Primitive::group(9, Vec::new()).with_version(4),
        ]);
        let source = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            Primitive::group(9, vec![Member::new("stop", PrimitiveId::point(1))]).with_version(4),
        ]);
        let (result, conflicts, _) = run(target, &source);
        assert!(conflicts.is_empty());
        assert_eq!(
            result.get(PrimitiveId::group(9)).unwrap().members(),
            &[Member::new("stop", PrimitiveId::point(1))]
        );
    }

    #[test]
    fn test_modified_equal_target_clears_modified_flag() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_tag("a", "b").with_modified(true)]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2).with_tag("a", "b")]);
        let (result, conflicts, _) = run(target, &source);
        assert!(!result.get(PrimitiveId::point(1)).unwrap().is_modified());
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_modified_different_target_keeps_edit() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_tag("a", "mine").with_modified(true)]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(2).with_tag("a", "theirs")]);
        let (result, conflicts, _) = run(target, &source);
        let p = result.get(PrimitiveId::point(1)).unwrap();
        assert!(p.is_modified());
        assert_eq!(p.tags().get("a").map(String::as_str), Some("mine"));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_modified_vs_deleted_conflicts() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_modified(true)]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(3).with_deleted(true)]);
        let (result, conflicts, _) = run(target, &source);
        assert_eq!(conflicts.len(), 1);
        assert!(!result.get(PrimitiveId::point(1)).unwrap().is_deleted());
    }

    #[test]
    fn test_both_modified_equal_adopts_technical_attributes() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_modified(true)]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(3).with_modified(true)]);
        let (result, conflicts, _) = run(target, &source);
        assert!(conflicts.is_empty());
        assert_eq!(result.get(PrimitiveId::point(1)).unwrap().version(), 3);
    }

    #[test]
    fn test_deleted_new_source_is_skipped() {
        let target = Graph::new();
        let source = graph(vec![point(-1, 0.0, 0.0).with_deleted(true)]);
        let (result, _, stats) = run(target, &source);
        assert!(result.is_empty());
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_new_source_without_match_is_cloned_with_fresh_id() {
        let target = graph(vec![point(-1, 9.0, 9.0)]);
        let source = graph(vec![point(-1, 0.0, 0.0).with_tag("k", "v")]);
        let mut merger = GraphMerger::new(target, &source);
        merger.merge().unwrap();
        let clone_id = merger.merge_target(PrimitiveId::point(-1)).unwrap();
        assert_ne!(clone_id, PrimitiveId::point(-1));
        assert!(clone_id.is_new());
        assert_eq!(merger.result_graph().len(), 2);
        assert_eq!(merger.stats().cloned, 1);
    }

    #[test]
    fn test_unknown_real_id_is_cloned_with_same_id() {
        let target = Graph::new();
        let source = graph(vec![
            point(3, 0.0, 0.0).with_version(1),
            point(4, 0.0, 1.0).with_version(1),
            Primitive::path(8, [3, 4]).with_version(2),
        ]);
        let (result, _, stats) = run(target, &source);
        assert_eq!(stats.cloned, 3);
        let path = result.get(PrimitiveId::path(8)).unwrap();
        assert_eq!(path.version(), 2);
        assert_eq!(path.points(), &[PrimitiveId::point(3), PrimitiveId::point(4)]);
    }

    #[test]
    fn test_deleted_point_in_repaired_path_is_revived() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            point(2, 0.0, 1.0).with_version(3).with_deleted(true).with_modified(true),
            Primitive::path(5, [1]).with_version(1),
        ]);
        let source = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            point(2, 0.0, 1.0).with_version(2),
            Primitive::path(5, [1, 2]).with_version(2),
        ]);
        let (result, conflicts, _) = run(target, &source);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts.all()[0].mine(), PrimitiveId::point(2));
        assert!(conflicts.all()[0].is_my_side());
        assert!(!result.get(PrimitiveId::point(2)).unwrap().is_deleted());
        assert_eq!(result.get(PrimitiveId::path(5)).unwrap().points().len(), 2);
    }

    #[test]
    fn test_conflicting_path_is_not_repaired() {
        let target = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            Primitive::path(5, [1]).with_version(2).with_tag("name", "mine").with_modified(true),
        ]);
        let source = graph(vec![
            point(1, 0.0, 0.0).with_version(1),
            point(2, 0.0, 1.0).with_version(1),
            Primitive::path(5, [1, 2]).with_version(3).with_tag("name", "theirs"),
        ]);
        let (result, conflicts, _) = run(target, &source);
        assert!(conflicts.has_conflict_for(PrimitiveId::path(5), Side::Theirs));
        assert_eq!(result.get(PrimitiveId::path(5)).unwrap().points(), &[PrimitiveId::point(1)]);
    }

    #[test]
    fn test_merge_into_existing_conflict_set() {
        let target = graph(vec![point(1, 0.0, 0.0).with_version(2).with_modified(true)]);
        let source = graph(vec![point(1, 0.0, 0.0).with_version(3).with_deleted(true)]);
        let mut existing = ConflictSet::new();
        existing
            .add(PrimitiveId::point(1), source.get(PrimitiveId::point(1)).unwrap(), false)
            .unwrap();
        let mut merger = GraphMerger::with_conflicts(target, &source, existing);
        merger.merge().unwrap();
        assert_eq!(merger.conflicts().len(), 1);
        assert_eq!(merger.stats().conflicts, 0);
    }
}
