//! `Document`: the replica itself. Everything else in this crate
//! exists to support its handful of public entry points — apply a local
//! edit, integrate remote operations, undo/redo, manage checkpoints, and
//! read/write markers.

use std::collections::{HashMap, HashSet, VecDeque};

use smartstring::alias::String as SmartString;

use crate::clock::{Clock, SystemClock};
use crate::doc_tree::DocumentTree;
use crate::error::{ReplicaError, Result};
use crate::history::{
    CheckpointRecord, History, HistoryRecord, HistoryTransactionRecord, MarkerSnapshot,
    RecordedOp, TransactionRecord, UndoHistory, UndoRecord,
};
use crate::marker::{
    LayerId, LinearMarker, LinearRange, LogicalMarker, LogicalRange, MarkerEntryUpdate, MarkerId,
    MarkerUpdateRequest, SiteId,
};
use crate::operation::{
    DocumentStateUpdate, MarkerDelta, MarkerMap, MarkersUpdateOperation, Operation,
    SpliceOperation, TextDeletionMod, TextInsertionMod, TextUpdate, UndoOperation, UndoRedoResult,
    WireMarkerEntry,
};
use crate::point::Point;
use crate::segment::{SegIdx, Segment, SegmentArena};
use crate::splay;
use crate::splice_id::{SpliceAnchor, SpliceId};
use crate::split_tree::{self, SplitLinks};

/// A replicated document. Generic over [`Clock`] so tests can swap in a
/// [`crate::clock::ManualClock`]; `Document::new` and friends target the
/// ordinary wall-clock-backed [`SystemClock`] instantiation.
pub struct Document<C: Clock = SystemClock> {
    site_id: SiteId,
    arena: SegmentArena,
    doc_tree: DocumentTree,
    start_sentinel: SegIdx,
    end_sentinel: SegIdx,

    /// The first-ever segment created for a splice, i.e. the stable entry
    /// point into that splice's split tree.
    splice_entry_point: HashMap<SpliceId, SegIdx>,
    /// Segments currently carrying a given deletion's `SpliceId` in their
    /// `deletions` set, so an undo of that deletion knows what to revisit.
    deleted_by: HashMap<SpliceId, Vec<SegIdx>>,

    max_sequence_number_by_site: HashMap<SiteId, u32>,
    undo_count_by_splice_id: HashMap<SpliceId, u32>,

    markers: HashMap<SiteId, HashMap<LayerId, HashMap<MarkerId, LogicalMarker>>>,
    deferred_marker_updates: HashMap<(SiteId, LayerId, MarkerId), LogicalMarker>,
    deferred_marker_updates_by_dependency: HashMap<SpliceId, Vec<(SiteId, LayerId, MarkerId)>>,
    deferred_operations: HashMap<SpliceId, Vec<Operation>>,

    undo_history: UndoHistory,
    /// Every integrated `Splice`/`Undo` operation, in integration order
    /// (`getOperations`). Marker updates aren't appended here; the live
    /// marker state is summarized fresh on every `get_operations` call.
    operations_log: Vec<Operation>,

    clock: C,
}

impl Document<SystemClock> {
    /// A fresh, empty document.
    pub fn new(site_id: SiteId) -> Result<Self> {
        Self::with_clock(site_id, SystemClock)
    }

    /// A fresh document seeded with `text` as its initial content. The
    /// seeding splice is not recorded on the undo stack — there is nothing
    /// to undo back past the document's own origin.
    pub fn with_text(site_id: SiteId, text: &str) -> Result<Self> {
        let mut doc = Self::with_clock(site_id, SystemClock)?;
        if !text.is_empty() {
            doc.apply_local_splice(Point::ZERO, Point::ZERO, text)?;
        }
        Ok(doc)
    }

    /// Restores a document from a previously captured [`History`] snapshot.
    pub fn from_history(site_id: SiteId, history: &History) -> Result<Self> {
        let mut doc = Self::with_clock(site_id, SystemClock)?;
        doc.populate_history(history)?;
        Ok(doc)
    }
}

impl<C: Clock> Document<C> {
    /// Constructs an empty document over a caller-supplied clock, for tests
    /// that need deterministic transaction-grouping timestamps.
    pub fn with_clock(site_id: SiteId, clock: C) -> Result<Self> {
        if site_id == crate::splice_id::SENTINEL_SITE {
            return Err(ReplicaError::ReservedSiteId);
        }
        let mut arena = SegmentArena::new();
        let mut doc_tree = DocumentTree::new();

        let start = Segment::new(
            SpliceId::START_SENTINEL,
            Point::ZERO,
            SmartString::new(),
            SpliceAnchor::new(SpliceId::START_SENTINEL, Point::ZERO),
            SpliceAnchor::new(SpliceId::START_SENTINEL, Point::ZERO),
        );
        let end = Segment::new(
            SpliceId::END_SENTINEL,
            Point::ZERO,
            SmartString::new(),
            SpliceAnchor::new(SpliceId::END_SENTINEL, Point::ZERO),
            SpliceAnchor::new(SpliceId::END_SENTINEL, Point::ZERO),
        );
        let start_idx = arena.push(start);
        let end_idx = arena.push(end);
        doc_tree.seed_pair(&mut arena, start_idx, end_idx);

        let mut splice_entry_point = HashMap::new();
        splice_entry_point.insert(SpliceId::START_SENTINEL, start_idx);
        splice_entry_point.insert(SpliceId::END_SENTINEL, end_idx);

        Ok(Document {
            site_id,
            arena,
            doc_tree,
            start_sentinel: start_idx,
            end_sentinel: end_idx,
            splice_entry_point,
            deleted_by: HashMap::new(),
            max_sequence_number_by_site: HashMap::new(),
            undo_count_by_splice_id: HashMap::new(),
            markers: HashMap::new(),
            deferred_marker_updates: HashMap::new(),
            deferred_marker_updates_by_dependency: HashMap::new(),
            deferred_operations: HashMap::new(),
            undo_history: UndoHistory::new(),
            operations_log: Vec::new(),
            clock,
        })
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    /// The document's current linear text.
    pub fn get_text(&self) -> String {
        let mut out = String::new();
        for idx in self.doc_tree.get_segments(&self.arena) {
            if self.arena[idx].visible {
                out.push_str(&self.arena[idx].text);
            }
        }
        out
    }

    pub fn get_history(&mut self, max_entries: usize) -> History {
        self.materialize_history(max_entries)
    }

    pub fn get_operations(&self) -> Vec<Operation> {
        let mut ops = self.operations_log.clone();
        for (&site_id, layers) in &self.markers {
            let mut updates: HashMap<LayerId, Option<HashMap<MarkerId, WireMarkerEntry>>> =
                HashMap::new();
            for (&layer_id, markers) in layers {
                let mut layer_map = HashMap::new();
                for (&marker_id, marker) in markers {
                    layer_map.insert(marker_id, Some(*marker));
                }
                updates.insert(layer_id, Some(layer_map));
            }
            if !updates.is_empty() {
                ops.push(Operation::MarkersUpdate(MarkersUpdateOperation { site_id, updates }));
            }
        }
        ops
    }

    /// Resolves every stored logical marker to its current linear range.
    pub fn get_markers(&mut self) -> MarkerMap {
        let sites: Vec<SiteId> = self.markers.keys().copied().collect();
        let mut out = MarkerMap::new();
        for site in sites {
            let layers: Vec<LayerId> = self.markers[&site].keys().copied().collect();
            for layer in layers {
                let ids: Vec<MarkerId> = self.markers[&site][&layer].keys().copied().collect();
                for id in ids {
                    let logical = self.markers[&site][&layer][&id];
                    if let Ok(range) = self.resolve_logical_range(&logical.range, logical.exclusive) {
                        let linear = LinearMarker::new(logical.exclusive, logical.reversed, logical.tailed, range);
                        out.entry(site).or_default().entry(layer).or_default().insert(id, linear);
                    }
                }
            }
        }
        out
    }

    // ---------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------

    /// Replaces `[start, end)` with `text`, recording the result as a new
    /// transaction and clearing the redo stack.
    pub fn set_text_in_range(&mut self, start: Point, end: Point, text: &str) -> Result<SpliceOperation> {
        let op = self.apply_local_splice(start, end, text)?;
        self.undo_history.clear_redo();
        self.undo_history.push_transaction(TransactionRecord {
            timestamp: self.clock.now(),
            grouping_interval: None,
            operations: vec![RecordedOp::Splice(op.clone())],
            markers_before: None,
            markers_after: None,
        });
        Ok(op)
    }

    /// The part of `set_text_in_range` shared with history replay: allocates
    /// a fresh local `SpliceId`, mutates the trees, and logs the operation,
    /// without touching the undo stack.
    fn apply_local_splice(&mut self, start: Point, end: Point, text: &str) -> Result<SpliceOperation> {
        let expected_prev = self.max_sequence_number_by_site.get(&self.site_id).copied().unwrap_or(0);
        let splice_id = SpliceId::new(self.site_id, expected_prev + 1);
        debug_assert_eq!(
            expected_prev,
            splice_id.sequence_number - 1,
            "local splice must immediately follow the site's last observed sequence number"
        );

        let deletion = if end > start { Some(self.delete_range(start, end, splice_id)?) } else { None };
        let insertion = if !text.is_empty() { Some(self.insert_text(start, text, splice_id)?) } else { None };

        self.max_sequence_number_by_site.insert(self.site_id, splice_id.sequence_number);

        let op = SpliceOperation { splice_id, deletion, insertion };
        self.operations_log.push(Operation::Splice(op.clone()));
        Ok(op)
    }

    /// Finds the document-tree neighbors straddling linear position `p`,
    /// splitting the segment that straddles it (if any). Returns `(left,
    /// right)`, document-tree-adjacent segments with `p` exactly between
    /// them.
    fn bracket_at(&mut self, p: Point) -> Result<(SegIdx, SegIdx)> {
        let (seg, start, end) = self.doc_tree.find_segment_containing_position(&mut self.arena, p)?;
        if p == start {
            let left = self.doc_tree.predecessor(&self.arena, seg).ok_or(ReplicaError::SegmentNotFound)?;
            return Ok((left, seg));
        }
        if p == end {
            let right = self.doc_tree.successor(&self.arena, seg).ok_or(ReplicaError::SegmentNotFound)?;
            return Ok((seg, right));
        }
        let offset_in_segment = p.traversal(&start);
        self.split_segment_at(seg, offset_in_segment)
    }

    /// Splits `seg` (which must currently be visible, non-empty, and
    /// straddle `offset_in_segment`) into a prefix/suffix pair in both the
    /// split tree and the document tree.
    fn split_segment_at(&mut self, seg: SegIdx, offset_in_segment: Point) -> Result<(SegIdx, SegIdx)> {
        let suffix = split_tree::split_segment(&mut self.arena, seg, offset_in_segment);
        self.doc_tree.split_segment(&mut self.arena, seg, suffix);
        Ok((seg, suffix))
    }

    fn insert_text(&mut self, position: Point, text: &str, splice_id: SpliceId) -> Result<TextInsertionMod> {
        let (left, right) = self.bracket_at(position)?;
        let left_dep = self.arena[left].end_anchor();
        let right_dep = self.arena[right].start_anchor();

        let smart_text: SmartString = text.into();
        let new_seg = Segment::new(splice_id, Point::ZERO, smart_text.clone(), left_dep, right_dep);
        let new_idx = self.arena.push(new_seg);
        self.doc_tree.insert_between(&mut self.arena, left, right, new_idx);
        self.splice_entry_point.insert(splice_id, new_idx);

        Ok(TextInsertionMod {
            text: smart_text,
            left_dependency_id: left_dep.splice_id,
            offset_in_left_dependency: left_dep.offset,
            right_dependency_id: right_dep.splice_id,
            offset_in_right_dependency: right_dep.offset,
        })
    }

    fn delete_range(&mut self, start: Point, end: Point, splice_id: SpliceId) -> Result<TextDeletionMod> {
        let (_, first) = self.bracket_at(start)?;
        let (last, _) = self.bracket_at(end)?;
        let left_dep = self.arena[first].start_anchor();
        let right_dep = self.arena[last].end_anchor();

        let mut max_seq_by_site: HashMap<SiteId, u32> = HashMap::new();
        let mut cur = Some(first);
        loop {
            let idx = cur.expect("last must be reachable from first via document-tree successors");
            let owner = self.arena[idx].splice_id;
            let entry = max_seq_by_site.entry(owner.site_id).or_insert(0);
            if owner.sequence_number > *entry {
                *entry = owner.sequence_number;
            }
            self.mark_deleted(idx, splice_id);
            if idx == last {
                break;
            }
            cur = self.doc_tree.successor(&self.arena, idx);
        }

        Ok(TextDeletionMod {
            max_sequence_number_by_site: max_seq_by_site,
            left_dependency_id: left_dep.splice_id,
            offset_in_left_dependency: left_dep.offset,
            right_dependency_id: right_dep.splice_id,
            offset_in_right_dependency: right_dep.offset,
        })
    }

    fn mark_deleted(&mut self, idx: SegIdx, deletion_splice_id: SpliceId) {
        if !self.arena[idx].deletions.contains(&deletion_splice_id) {
            self.arena[idx].deletions.push(deletion_splice_id);
            self.deleted_by.entry(deletion_splice_id).or_default().push(idx);
            self.recompute_visibility(idx);
        }
    }

    fn is_undone(&self, splice_id: SpliceId) -> bool {
        self.undo_count_by_splice_id.get(&splice_id).copied().unwrap_or(0) % 2 == 1
    }

    fn compute_visible(&self, idx: SegIdx) -> bool {
        let seg = &self.arena[idx];
        if seg.splice_id.is_sentinel() {
            return false;
        }
        if self.is_undone(seg.splice_id) {
            return false;
        }
        seg.deletions.iter().all(|d| self.is_undone(*d))
    }

    /// Recomputes `idx`'s cached `visible` flag; if it changed, refreshes
    /// the document tree aggregate and reports the change.
    fn recompute_visibility(&mut self, idx: SegIdx) -> bool {
        let v = self.compute_visible(idx);
        if self.arena[idx].visible != v {
            self.arena[idx].visible = v;
            self.doc_tree.refresh(&mut self.arena, idx);
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------
    // Remote integration
    // ---------------------------------------------------------------

    pub fn integrate_operations(&mut self, ops: Vec<Operation>) -> Result<DocumentStateUpdate> {
        let mut update = DocumentStateUpdate::default();
        let mut queue: VecDeque<Operation> = ops.into_iter().collect();
        while let Some(op) = queue.pop_front() {
            self.integrate_single(op, &mut queue, &mut update)?;
        }
        Ok(update)
    }

    fn integrate_single(
        &mut self,
        op: Operation,
        queue: &mut VecDeque<Operation>,
        update: &mut DocumentStateUpdate,
    ) -> Result<()> {
        match op {
            Operation::Splice(s) => {
                if self.splice_already_applied(&s) {
                    return Ok(());
                }
                if !self.splice_is_ready(&s) {
                    self.defer_operation(Operation::Splice(s));
                    return Ok(());
                }
                let splice_id = s.splice_id;
                let du = self.apply_remote_splice(s)?;
                update.merge(du);
                self.requeue_dependents(splice_id, queue, update);
            }
            Operation::Undo(u) => {
                if self.undo_count_by_splice_id.get(&u.splice_id).copied().unwrap_or(0) >= u.undo_count {
                    return Ok(());
                }
                if !self.undo_is_ready(&u) {
                    self.defer_operation(Operation::Undo(u));
                    return Ok(());
                }
                let splice_id = u.splice_id;
                let du = self.apply_remote_undo(u)?;
                update.merge(du);
                self.requeue_dependents(splice_id, queue, update);
            }
            Operation::MarkersUpdate(m) => {
                let du = self.apply_markers_update(m);
                update.merge(du);
            }
        }
        Ok(())
    }

    fn splice_already_applied(&self, s: &SpliceOperation) -> bool {
        let have = self.max_sequence_number_by_site.get(&s.splice_id.site_id).copied().unwrap_or(0);
        have >= s.splice_id.sequence_number
    }

    fn splice_is_ready(&self, s: &SpliceOperation) -> bool {
        self.missing_splice_dependencies(s).is_empty()
    }

    fn missing_splice_dependencies(&self, s: &SpliceOperation) -> Vec<SpliceId> {
        let mut missing = Vec::new();
        let have = self.max_sequence_number_by_site.get(&s.splice_id.site_id).copied().unwrap_or(0);
        if have != s.splice_id.sequence_number - 1 {
            missing.push(SpliceId::new(s.splice_id.site_id, s.splice_id.sequence_number - 1));
        }
        if let Some(d) = &s.deletion {
            if !self.splice_entry_point.contains_key(&d.left_dependency_id) {
                missing.push(d.left_dependency_id);
            }
            if !self.splice_entry_point.contains_key(&d.right_dependency_id) {
                missing.push(d.right_dependency_id);
            }
            for (&site, &seq) in &d.max_sequence_number_by_site {
                let have_site = self.max_sequence_number_by_site.get(&site).copied().unwrap_or(0);
                if have_site < seq {
                    missing.push(SpliceId::new(site, seq));
                }
            }
        }
        if let Some(i) = &s.insertion {
            if !self.splice_entry_point.contains_key(&i.left_dependency_id) {
                missing.push(i.left_dependency_id);
            }
            if !self.splice_entry_point.contains_key(&i.right_dependency_id) {
                missing.push(i.right_dependency_id);
            }
        }
        missing
    }

    fn undo_is_ready(&self, u: &UndoOperation) -> bool {
        self.splice_entry_point.contains_key(&u.splice_id) || self.deleted_by.contains_key(&u.splice_id)
    }

    fn defer_operation(&mut self, op: Operation) {
        let keys = match &op {
            Operation::Splice(s) => self.missing_splice_dependencies(s),
            Operation::Undo(u) => vec![u.splice_id],
            Operation::MarkersUpdate(_) => Vec::new(),
        };
        for key in keys {
            self.deferred_operations.entry(key).or_default().push(op.clone());
        }
    }

    fn requeue_dependents(&mut self, splice_id: SpliceId, queue: &mut VecDeque<Operation>, update: &mut DocumentStateUpdate) {
        if let Some(ops) = self.deferred_operations.remove(&splice_id) {
            queue.extend(ops);
        }
        self.recheck_deferred_markers(splice_id, update);
    }

    fn apply_remote_splice(&mut self, op: SpliceOperation) -> Result<DocumentStateUpdate> {
        let mut touched = Vec::new();
        if let Some(ins) = &op.insertion {
            touched.push(self.integrate_insertion(op.splice_id, ins)?);
        }
        if let Some(del) = &op.deletion {
            touched.extend(self.integrate_deletion(op.splice_id, del)?);
        }
        self.max_sequence_number_by_site.insert(op.splice_id.site_id, op.splice_id.sequence_number);
        self.operations_log.push(Operation::Splice(op));

        let mut update = DocumentStateUpdate::default();
        update.text_updates = self.text_updates_for_changes(&touched);
        Ok(update)
    }

    /// The integration ordering rule: places a remote insertion
    /// among any concurrent siblings at the same gap, tie-broken by site id.
    fn integrate_insertion(&mut self, splice_id: SpliceId, ins: &TextInsertionMod) -> Result<SegIdx> {
        let left_entry = *self
            .splice_entry_point
            .get(&ins.left_dependency_id)
            .ok_or(ReplicaError::SegmentNotFound)?;
        let right_entry = *self
            .splice_entry_point
            .get(&ins.right_dependency_id)
            .ok_or(ReplicaError::SegmentNotFound)?;
        let left_dep_seg = split_tree::find_segment_containing_offset(&mut self.arena, left_entry, ins.offset_in_left_dependency)?;
        let right_dep_seg = split_tree::find_segment_containing_offset(&mut self.arena, right_entry, ins.offset_in_right_dependency)?;

        let placement_left_index = self.doc_tree.get_segment_index(&mut self.arena, left_dep_seg);
        let placement_right_index = self.doc_tree.get_segment_index(&mut self.arena, right_dep_seg);

        let mut left = left_dep_seg;
        let right_bound = right_dep_seg;
        let mut right = right_bound;

        loop {
            let candidate = self.doc_tree.successor(&self.arena, left).ok_or(ReplicaError::SegmentNotFound)?;
            if candidate == right {
                break;
            }
            let c = &self.arena[candidate];
            let (c_left_anchor, c_right_anchor) = (c.left_dependency, c.right_dependency);
            let c_site = c.splice_id.site_id;

            let c_left_entry = *self
                .splice_entry_point
                .get(&c_left_anchor.splice_id)
                .ok_or(ReplicaError::SegmentNotFound)?;
            let c_right_entry = *self
                .splice_entry_point
                .get(&c_right_anchor.splice_id)
                .ok_or(ReplicaError::SegmentNotFound)?;
            let c_left_seg = split_tree::find_segment_containing_offset(&mut self.arena, c_left_entry, c_left_anchor.offset)?;
            let c_right_seg = split_tree::find_segment_containing_offset(&mut self.arena, c_right_entry, c_right_anchor.offset)?;
            let c_left_index = self.doc_tree.get_segment_index(&mut self.arena, c_left_seg);
            let c_right_index = self.doc_tree.get_segment_index(&mut self.arena, c_right_seg);

            if c_left_index <= placement_left_index && c_right_index >= placement_right_index {
                if splice_id.site_id < c_site {
                    right = candidate;
                } else {
                    left = candidate;
                }
            } else {
                left = candidate;
            }
        }

        let new_seg = Segment::new(
            splice_id,
            Point::ZERO,
            ins.text.clone(),
            SpliceAnchor::new(ins.left_dependency_id, ins.offset_in_left_dependency),
            SpliceAnchor::new(ins.right_dependency_id, ins.offset_in_right_dependency),
        );
        let new_idx = self.arena.push(new_seg);
        self.doc_tree.insert_between(&mut self.arena, left, right, new_idx);
        self.splice_entry_point.insert(splice_id, new_idx);
        Ok(new_idx)
    }

    fn integrate_deletion(&mut self, splice_id: SpliceId, del: &TextDeletionMod) -> Result<Vec<SegIdx>> {
        let left_entry = *self
            .splice_entry_point
            .get(&del.left_dependency_id)
            .ok_or(ReplicaError::SegmentNotFound)?;
        let right_entry = *self
            .splice_entry_point
            .get(&del.right_dependency_id)
            .ok_or(ReplicaError::SegmentNotFound)?;
        let first = split_tree::find_segment_containing_offset(&mut self.arena, left_entry, del.offset_in_left_dependency)?;
        let last = split_tree::find_segment_containing_offset(&mut self.arena, right_entry, del.offset_in_right_dependency)?;

        let mut touched = Vec::new();
        let mut cur = Some(first);
        loop {
            let idx = cur.expect("last reachable from first via document-tree successors");
            let owner = self.arena[idx].splice_id;
            let have = del.max_sequence_number_by_site.get(&owner.site_id).copied().unwrap_or(0);
            if have >= owner.sequence_number {
                let before = self.arena[idx].visible;
                self.mark_deleted(idx, splice_id);
                if before != self.arena[idx].visible {
                    touched.push(idx);
                }
            }
            if idx == last {
                break;
            }
            cur = self.doc_tree.successor(&self.arena, idx);
        }
        Ok(touched)
    }

    fn apply_remote_undo(&mut self, op: UndoOperation) -> Result<DocumentStateUpdate> {
        self.undo_count_by_splice_id.insert(op.splice_id, op.undo_count);
        let touched = self.revisit_segments_for_splice(op.splice_id);
        self.operations_log.push(Operation::Undo(op));
        let mut update = DocumentStateUpdate::default();
        update.text_updates = self.text_updates_for_changes(&touched);
        Ok(update)
    }

    /// Revisits every segment that could be affected by `splice_id`'s undo
    /// count changing: every piece of the splice itself (insertion side),
    /// and every segment whose `deletions` set names it (deletion side).
    fn revisit_segments_for_splice(&mut self, splice_id: SpliceId) -> Vec<SegIdx> {
        let mut touched = Vec::new();
        if let Some(&entry) = self.splice_entry_point.get(&splice_id) {
            let root = split_tree::find_root(&self.arena, entry);
            for idx in splay::in_order::<SplitLinks>(&self.arena, Some(root)) {
                if self.recompute_visibility(idx) {
                    touched.push(idx);
                }
            }
        }
        if let Some(segs) = self.deleted_by.get(&splice_id).cloned() {
            for idx in segs {
                if self.recompute_visibility(idx) {
                    touched.push(idx);
                }
            }
        }
        touched
    }

    /// Builds the coalesced [`TextUpdate`] list for a batch of segments
    /// whose visibility just flipped. A touched segment's "before"
    /// state is always the opposite of its current cached `visible` flag —
    /// true for a segment that just became invisible, or for a brand-new
    /// insertion (which didn't exist at all, equivalent to invisible).
    fn text_updates_for_changes(&mut self, touched: &[SegIdx]) -> Vec<TextUpdate> {
        if touched.is_empty() {
            return Vec::new();
        }
        let touched_set: HashSet<SegIdx> = touched.iter().copied().collect();
        let mut by_index: Vec<(u32, SegIdx)> = Vec::with_capacity(touched.len());
        for &idx in touched {
            let index = self.doc_tree.get_segment_index(&mut self.arena, idx);
            by_index.push((index, idx));
        }
        by_index.sort_by_key(|&(index, _)| index);

        let first = by_index[0].1;
        let last = by_index[by_index.len() - 1].1;

        let mut old_pos = self.doc_tree.get_segment_position(&mut self.arena, first);
        let mut new_pos = old_pos;
        let mut updates: Vec<TextUpdate> = Vec::new();
        let mut run: Option<(Point, Point, String, String)> = None;

        let mut cur = Some(first);
        loop {
            let idx = cur.expect("last reachable from first via document-tree successors");
            let currently_visible = self.arena[idx].visible;
            let is_touched = touched_set.contains(&idx);
            let before_visible = if is_touched { !currently_visible } else { currently_visible };
            let extent = self.arena[idx].extent;

            if is_touched {
                let (old_start, new_start, mut old_text, mut new_text) =
                    run.take().unwrap_or((old_pos, new_pos, String::new(), String::new()));
                if before_visible {
                    old_text.push_str(&self.arena[idx].text);
                }
                if currently_visible {
                    new_text.push_str(&self.arena[idx].text);
                }
                run = Some((old_start, new_start, old_text, new_text));
            } else if let Some((old_start, new_start, old_text, new_text)) = run.take() {
                push_or_merge_update(&mut updates, old_start, old_pos, old_text, new_start, new_pos, new_text);
            }

            if before_visible {
                old_pos = old_pos.traverse(&extent);
            }
            if currently_visible {
                new_pos = new_pos.traverse(&extent);
            }

            if idx == last {
                break;
            }
            cur = self.doc_tree.successor(&self.arena, idx);
        }
        if let Some((old_start, new_start, old_text, new_text)) = run.take() {
            push_or_merge_update(&mut updates, old_start, old_pos, old_text, new_start, new_pos, new_text);
        }
        updates
    }

    // ---------------------------------------------------------------
    // Markers
    // ---------------------------------------------------------------

    fn get_logical_range(&mut self, linear: LinearRange, is_exclusive: bool) -> Result<LogicalRange> {
        let start = self.find_segment_anchor(linear.start, is_exclusive)?;
        let prefer_end_start = !is_exclusive || linear.start == linear.end;
        let end = self.find_segment_anchor(linear.end, prefer_end_start)?;
        Ok(LogicalRange::new(start, end))
    }

    fn find_segment_anchor(&mut self, position: Point, prefer_start: bool) -> Result<SpliceAnchor> {
        let (seg, start, end) = self.doc_tree.find_segment_containing_position(&mut self.arena, position)?;
        if position == end && prefer_start {
            if let Some(succ) = self.doc_tree.successor(&self.arena, seg) {
                return Ok(self.arena[succ].start_anchor());
            }
        }
        let within = position.traversal(&start);
        Ok(SpliceAnchor::new(self.arena[seg].splice_id, self.arena[seg].offset.traverse(&within)))
    }

    fn resolve_logical_range(&mut self, logical: &LogicalRange, is_exclusive: bool) -> Result<LinearRange> {
        let same = logical.start == logical.end;
        let start = self.resolve_logical_position(logical.start, is_exclusive)?;
        let end = self.resolve_logical_position(logical.end, !is_exclusive || same)?;
        Ok(LinearRange::new(start, end))
    }

    fn resolve_logical_position(&mut self, anchor: SpliceAnchor, prefer_start: bool) -> Result<Point> {
        let entry = *self
            .splice_entry_point
            .get(&anchor.splice_id)
            .ok_or(ReplicaError::SegmentNotFound)?;
        let mut piece = split_tree::find_segment_containing_offset(&mut self.arena, entry, anchor.offset)?;
        if !prefer_start && anchor.offset == self.arena[piece].offset {
            if let Some(pred) = splay::predecessor::<SplitLinks>(&self.arena, piece) {
                piece = pred;
            }
        }
        let within = anchor.offset.traversal(&self.arena[piece].offset);
        let piece_start = self.doc_tree.get_segment_position(&mut self.arena, piece);
        if self.arena[piece].visible {
            Ok(piece_start.traverse(&within))
        } else {
            Ok(piece_start)
        }
    }

    fn missing_anchor_deps(&self, range: &LogicalRange) -> Vec<SpliceId> {
        let mut missing = Vec::new();
        if !self.splice_entry_point.contains_key(&range.start.splice_id) {
            missing.push(range.start.splice_id);
        }
        if !self.splice_entry_point.contains_key(&range.end.splice_id) {
            missing.push(range.end.splice_id);
        }
        missing
    }

    /// Applies a local marker update request, producing the
    /// `MarkersUpdateOperation` to broadcast. Local positions always resolve
    /// immediately; there is no deferral on the originating replica.
    pub fn update_markers(&mut self, request: MarkerUpdateRequest) -> Result<MarkersUpdateOperation> {
        let site_id = self.site_id;
        let mut wire: HashMap<LayerId, Option<HashMap<MarkerId, WireMarkerEntry>>> = HashMap::new();
        for (layer_id, layer_req) in request {
            match layer_req {
                None => {
                    if let Some(site_map) = self.markers.get_mut(&site_id) {
                        site_map.remove(&layer_id);
                    }
                    self.deferred_marker_updates.retain(|k, _| !(k.0 == site_id && k.1 == layer_id));
                    wire.insert(layer_id, None);
                }
                Some(entries) => {
                    let mut wire_layer = HashMap::new();
                    for (marker_id, entry) in entries {
                        match entry {
                            MarkerEntryUpdate::Remove => {
                                if let Some(layer) = self.markers.get_mut(&site_id).and_then(|m| m.get_mut(&layer_id)) {
                                    layer.remove(&marker_id);
                                }
                                wire_layer.insert(marker_id, None);
                            }
                            MarkerEntryUpdate::Set(linear_marker) => {
                                let range = self.get_logical_range(linear_marker.range, linear_marker.exclusive)?;
                                let logical = LogicalMarker::new(
                                    linear_marker.exclusive,
                                    linear_marker.reversed,
                                    linear_marker.tailed,
                                    range,
                                );
                                self.markers.entry(site_id).or_default().entry(layer_id).or_default().insert(marker_id, logical);
                                wire_layer.insert(marker_id, Some(logical));
                            }
                        }
                    }
                    wire.insert(layer_id, Some(wire_layer));
                }
            }
        }
        Ok(MarkersUpdateOperation { site_id, updates: wire })
    }

    fn apply_markers_update(&mut self, op: MarkersUpdateOperation) -> DocumentStateUpdate {
        let mut update = DocumentStateUpdate::default();
        for (layer_id, layer_update) in op.updates {
            match layer_update {
                None => {
                    if let Some(layer) = self.markers.get_mut(&op.site_id).and_then(|m| m.remove(&layer_id)) {
                        let mut removed = HashMap::new();
                        for marker_id in layer.keys() {
                            removed.insert(*marker_id, None);
                        }
                        self.deferred_marker_updates.retain(|k, _| !(k.0 == op.site_id && k.1 == layer_id));
                        update.marker_updates.entry(op.site_id).or_default().insert(layer_id, removed);
                    }
                }
                Some(entries) => {
                    for (marker_id, entry) in entries {
                        match entry {
                            None => {
                                if let Some(layer) = self.markers.get_mut(&op.site_id).and_then(|m| m.get_mut(&layer_id)) {
                                    layer.remove(&marker_id);
                                }
                                self.deferred_marker_updates.remove(&(op.site_id, layer_id, marker_id));
                                update
                                    .marker_updates
                                    .entry(op.site_id)
                                    .or_default()
                                    .entry(layer_id)
                                    .or_default()
                                    .insert(marker_id, None);
                            }
                            Some(logical) => {
                                let missing = self.missing_anchor_deps(&logical.range);
                                if missing.is_empty() {
                                    self.set_marker(op.site_id, layer_id, marker_id, logical, &mut update);
                                } else {
                                    let key = (op.site_id, layer_id, marker_id);
                                    self.deferred_marker_updates.insert(key, logical);
                                    for dep in missing {
                                        self.deferred_marker_updates_by_dependency.entry(dep).or_default().push(key);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        update
    }

    fn set_marker(
        &mut self,
        site_id: SiteId,
        layer_id: LayerId,
        marker_id: MarkerId,
        logical: LogicalMarker,
        update: &mut DocumentStateUpdate,
    ) {
        self.markers.entry(site_id).or_default().entry(layer_id).or_default().insert(marker_id, logical);
        if let Ok(range) = self.resolve_logical_range(&logical.range, logical.exclusive) {
            let linear = LinearMarker::new(logical.exclusive, logical.reversed, logical.tailed, range);
            update.marker_updates.entry(site_id).or_default().entry(layer_id).or_default().insert(marker_id, Some(linear));
        }
    }

    fn recheck_deferred_markers(&mut self, splice_id: SpliceId, update: &mut DocumentStateUpdate) {
        let Some(candidates) = self.deferred_marker_updates_by_dependency.remove(&splice_id) else {
            return;
        };
        for key in candidates {
            if let Some(logical) = self.deferred_marker_updates.get(&key).copied() {
                if self.missing_anchor_deps(&logical.range).is_empty() {
                    self.deferred_marker_updates.remove(&key);
                    let (site_id, layer_id, marker_id) = key;
                    self.set_marker(site_id, layer_id, marker_id, logical, update);
                }
            }
        }
    }

    fn snapshot_markers(&self) -> MarkerSnapshot {
        self.markers.clone()
    }

    // ---------------------------------------------------------------
    // Undo / redo / checkpoints
    // ---------------------------------------------------------------

    pub fn undo(&mut self) -> Option<UndoRedoResult> {
        let txn = self.undo_history.pop_for_undo()?;
        let (operations, touched) = self.toggle_operations(&txn.operations);
        let text_updates = self.text_updates_for_changes(&touched);
        let markers = txn.markers_before.clone().map(|snap| self.marker_delta_from_snapshot(&snap));
        Some(UndoRedoResult { operations, text_updates, markers })
    }

    pub fn redo(&mut self) -> Option<UndoRedoResult> {
        let txn = self.undo_history.pop_for_redo()?;
        let (operations, touched) = self.toggle_operations(&txn.operations);
        let text_updates = self.text_updates_for_changes(&touched);
        let markers = txn.markers_after.clone().map(|snap| self.marker_delta_from_snapshot(&snap));
        Some(UndoRedoResult { operations, text_updates, markers })
    }

    /// For each recorded modification, increments that splice's undo count
    /// by one (odd => undone, even => live), logging and returning the
    /// resulting counter-`UndoOperation`s plus the segments whose
    /// visibility flipped.
    fn toggle_operations(&mut self, ops: &[RecordedOp]) -> (Vec<UndoOperation>, Vec<SegIdx>) {
        let mut result = Vec::new();
        let mut touched = Vec::new();
        for op in ops {
            let splice_id = match op {
                RecordedOp::Splice(s) => s.splice_id,
                RecordedOp::Undo(u) => u.splice_id,
            };
            let undo_count = self.undo_count_by_splice_id.get(&splice_id).copied().unwrap_or(0) + 1;
            self.undo_count_by_splice_id.insert(splice_id, undo_count);
            let counter = UndoOperation { splice_id, undo_count };
            self.operations_log.push(Operation::Undo(counter));
            result.push(counter);
            touched.extend(self.revisit_segments_for_splice(splice_id));
        }
        (result, touched)
    }

    fn marker_delta_from_snapshot(&mut self, snapshot: &MarkerSnapshot) -> MarkerDelta {
        let mut delta = MarkerDelta::new();
        for (&site_id, layers) in snapshot {
            for (&layer_id, markers) in layers {
                for (&marker_id, logical) in markers {
                    self.markers.entry(site_id).or_default().entry(layer_id).or_default().insert(marker_id, *logical);
                    if let Ok(range) = self.resolve_logical_range(&logical.range, logical.exclusive) {
                        let linear = LinearMarker::new(logical.exclusive, logical.reversed, logical.tailed, range);
                        delta.entry(site_id).or_default().entry(layer_id).or_default().insert(marker_id, Some(linear));
                    }
                }
            }
        }
        delta
    }

    pub fn create_checkpoint(&mut self, is_barrier: bool, capture_markers: bool) -> u64 {
        let snapshot = if capture_markers { Some(self.snapshot_markers()) } else { None };
        self.undo_history.create_checkpoint(is_barrier, snapshot)
    }

    /// Collapses every transaction since checkpoint `id` into a single
    /// transaction, returning the linear text updates that batch represents.
    pub fn group_changes_since_checkpoint(
        &mut self,
        id: u64,
        delete_checkpoint: bool,
        capture_markers: bool,
    ) -> Option<Vec<TextUpdate>> {
        let (ops, markers_before) = self.undo_history.collect_since_checkpoint(id, delete_checkpoint)?;
        let text_updates = self.diff_for_operations(&ops);
        let markers_after = if capture_markers { Some(self.snapshot_markers()) } else { None };
        self.undo_history.push_transaction(TransactionRecord {
            timestamp: self.clock.now(),
            grouping_interval: None,
            operations: ops,
            markers_before,
            markers_after,
        });
        Some(text_updates)
    }

    /// Read-only: the linear text updates the transactions since checkpoint
    /// `id` represent, without altering the undo stack.
    pub fn get_changes_since_checkpoint(&mut self, id: u64) -> Option<Vec<TextUpdate>> {
        let ops = self.undo_history.peek_since_checkpoint(id)?;
        Some(self.diff_for_operations(&ops))
    }

    /// Undoes every transaction since checkpoint `id`, discarding them
    /// (they are not pushed onto the redo stack).
    pub fn revert_to_checkpoint(&mut self, id: u64, delete_checkpoint: bool) -> Option<UndoRedoResult> {
        let (ops, markers_before) = self.undo_history.collect_since_checkpoint(id, delete_checkpoint)?;
        let (operations, touched) = self.toggle_operations(&ops);
        let text_updates = self.text_updates_for_changes(&touched);
        let markers = markers_before.map(|snap| self.marker_delta_from_snapshot(&snap));
        Some(UndoRedoResult { operations, text_updates, markers })
    }

    pub fn apply_grouping_interval(&mut self, ms: u64) {
        self.undo_history.apply_grouping_interval(ms);
    }

    pub fn group_last_changes(&mut self) -> bool {
        self.undo_history.group_last_changes()
    }

    /// Computes the linear diff a batch of already-applied operations
    /// represents, using the "scoped transaction with guaranteed rollback"
    /// technique: flip the batch's undo counts forward (undoing it),
    /// measure, then flip them forward again (restoring the original
    /// parity), and report the inverse of the first measurement.
    fn diff_for_operations(&mut self, ops: &[RecordedOp]) -> Vec<TextUpdate> {
        let (undone, touched) = self.toggle_operations(ops);
        let undo_diff = self.text_updates_for_changes(&touched);
        let redo_ops: Vec<RecordedOp> = undone.into_iter().map(RecordedOp::Undo).collect();
        let (_, touched_again) = self.toggle_operations(&redo_ops);
        let _ = self.text_updates_for_changes(&touched_again);
        invert_updates(undo_diff)
    }

    /// Materializes a [`History`] snapshot by walking both stacks newest
    /// first, replaying each transaction's effect (forward for the redo
    /// stack, backward for the undo stack) to capture its linear changes,
    /// then restoring the live document to its prior state exactly.
    fn materialize_history(&mut self, max_entries: usize) -> History {
        let saved_counts = self.undo_count_by_splice_id.clone();

        let redo_len = self.undo_history.redo_stack.len();
        let take = redo_len.min(max_entries);
        let start = redo_len - take;
        let mut redo_out = Vec::with_capacity(take);
        for i in (start..redo_len).rev() {
            let rec = self.undo_history.redo_stack[i].clone();
            redo_out.push(self.materialize_record(rec, true));
        }
        for i in (start..redo_len).rev() {
            if let UndoRecord::Transaction(t) = &self.undo_history.redo_stack[i] {
                let ops = t.operations.clone();
                let (undone, touched) = self.toggle_operations(&ops);
                let _ = self.text_updates_for_changes(&touched);
                let _ = undone;
            }
        }
        redo_out.reverse();

        let undo_len = self.undo_history.undo_stack.len();
        let mut undo_out = Vec::with_capacity(undo_len);
        for i in (0..undo_len).rev() {
            let rec = self.undo_history.undo_stack[i].clone();
            undo_out.push(self.materialize_record(rec, false));
        }
        for i in (0..undo_len).rev() {
            if let UndoRecord::Transaction(t) = &self.undo_history.undo_stack[i] {
                let ops = t.operations.clone();
                let (undone, touched) = self.toggle_operations(&ops);
                let _ = self.text_updates_for_changes(&touched);
                let _ = undone;
            }
        }
        undo_out.reverse();

        self.undo_count_by_splice_id = saved_counts;

        History {
            base_text: None,
            next_checkpoint_id: self.undo_history.next_checkpoint_id(),
            undo_stack: undo_out,
            redo_stack: redo_out,
        }
    }

    /// `redo_direction == true` means `rec` comes off the redo stack and
    /// should be measured by redoing it (toggling forward from undone to
    /// live); `false` means it comes off the undo stack and is measured by
    /// undoing it, with the resulting diff stored inverted.
    fn materialize_record(&mut self, rec: UndoRecord, redo_direction: bool) -> HistoryRecord {
        match rec {
            UndoRecord::Checkpoint(c) => HistoryRecord::Checkpoint(c),
            UndoRecord::Transaction(t) => {
                let markers_before_live = self.snapshot_markers();
                let (_toggled, touched) = self.toggle_operations(&t.operations);
                let measured = self.text_updates_for_changes(&touched);
                let markers_after_live = self.snapshot_markers();

                let (changes, markers_before, markers_after) = if redo_direction {
                    (measured, Some(markers_before_live), Some(markers_after_live))
                } else {
                    (invert_updates(measured), Some(markers_after_live), Some(markers_before_live))
                };
                HistoryRecord::Transaction(HistoryTransactionRecord {
                    timestamp: t.timestamp,
                    grouping_interval: t.grouping_interval,
                    changes,
                    markers_before,
                    markers_after,
                })
            }
        }
    }

    /// Rebuilds the undo/redo stacks from a [`History`] snapshot, replaying
    /// each transaction's changes as ordinary local edits.
    fn populate_history(&mut self, history: &History) -> Result<()> {
        if let Some(text) = &history.base_text {
            if !text.is_empty() {
                self.apply_local_splice(Point::ZERO, Point::ZERO, text)?;
            }
        }

        for rec in history.undo_stack.iter().chain(history.redo_stack.iter().rev()) {
            match rec {
                HistoryRecord::Transaction(t) => {
                    let ops = self.replay_changes(&t.changes)?;
                    self.undo_history.push_transaction(TransactionRecord {
                        timestamp: t.timestamp,
                        grouping_interval: t.grouping_interval,
                        operations: ops,
                        markers_before: t.markers_before.clone(),
                        markers_after: t.markers_after.clone(),
                    });
                }
                HistoryRecord::Checkpoint(c) => {
                    self.undo_history.undo_stack.push(UndoRecord::Checkpoint(CheckpointRecord {
                        id: c.id,
                        is_barrier: false,
                        markers_snapshot: c.markers_snapshot.clone(),
                    }));
                }
            }
        }
        self.undo_history.set_next_checkpoint_id(history.next_checkpoint_id);

        for _ in 0..history.redo_stack.len() {
            self.undo();
        }
        Ok(())
    }

    fn replay_changes(&mut self, changes: &[TextUpdate]) -> Result<Vec<RecordedOp>> {
        let mut ops = Vec::with_capacity(changes.len());
        for change in changes {
            let op = self.apply_local_splice(change.old_start, change.old_end, &change.new_text)?;
            ops.push(RecordedOp::Splice(op));
        }
        Ok(ops)
    }
}

/// Pushes a flushed touched-run onto `updates`, merging into the previous
/// entry instead when the new run's start exactly abuts the prior update's
/// end on both sides — e.g. an untouched, zero-width invisible tombstone
/// sitting between two touched runs contributes nothing to `old_pos`/
/// `new_pos`, so the two runs it separates must collapse into one update
/// rather than two that merely happen to touch.
fn push_or_merge_update(
    updates: &mut Vec<TextUpdate>,
    old_start: Point,
    old_end: Point,
    old_text: String,
    new_start: Point,
    new_end: Point,
    new_text: String,
) {
    if let Some(prev) = updates.last_mut() {
        if prev.old_end == old_start && prev.new_end == new_start {
            prev.old_end = old_end;
            prev.old_text.push_str(&old_text);
            prev.new_end = new_end;
            prev.new_text.push_str(&new_text);
            return;
        }
    }
    updates.push(TextUpdate {
        old_start,
        old_end,
        old_text: old_text.into(),
        new_start,
        new_end,
        new_text: new_text.into(),
    });
}

fn invert_updates(updates: Vec<TextUpdate>) -> Vec<TextUpdate> {
    updates
        .into_iter()
        .map(|u| TextUpdate {
            old_start: u.new_start,
            old_end: u.new_end,
            old_text: u.new_text,
            new_start: u.old_start,
            new_end: u.old_end,
            new_text: u.old_text,
        })
        .collect()
}

impl DocumentStateUpdate {
    fn merge(&mut self, mut other: DocumentStateUpdate) {
        self.text_updates.append(&mut other.text_updates);
        for (site_id, layers) in other.marker_updates {
            for (layer_id, markers) in layers {
                self.marker_updates.entry(site_id).or_default().entry(layer_id).or_default().extend(markers);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_site_id_is_rejected() {
        assert!(matches!(Document::new(0), Err(ReplicaError::ReservedSiteId)));
    }

    #[test]
    fn empty_document_has_empty_text() {
        let doc = Document::new(1).unwrap();
        assert_eq!(doc.get_text(), "");
    }

    #[test]
    fn local_insert_and_delete_round_trip() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "hello").unwrap();
        assert_eq!(doc.get_text(), "hello");

        doc.set_text_in_range(Point::new(0, 1), Point::new(0, 4), "").unwrap();
        assert_eq!(doc.get_text(), "ho");
    }

    #[test]
    fn local_insert_in_the_middle() {
        let mut doc = Document::with_text(1, "hello world").unwrap();
        doc.set_text_in_range(Point::new(0, 5), Point::new(0, 5), ",").unwrap();
        assert_eq!(doc.get_text(), "hello, world");
    }

    #[test]
    fn undo_then_redo_restores_text() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
        doc.set_text_in_range(Point::new(0, 3), Point::new(0, 3), "def").unwrap();
        assert_eq!(doc.get_text(), "abcdef");

        let undo = doc.undo().unwrap();
        assert!(!undo.text_updates.is_empty());
        assert_eq!(doc.get_text(), "abc");

        doc.redo().unwrap();
        assert_eq!(doc.get_text(), "abcdef");
    }

    #[test]
    fn undo_with_nothing_to_undo_returns_none() {
        let mut doc = Document::new(1).unwrap();
        assert!(doc.undo().is_none());
    }

    #[test]
    fn barrier_checkpoint_blocks_undo() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
        doc.create_checkpoint(true, false);
        doc.set_text_in_range(Point::new(0, 3), Point::new(0, 3), "def").unwrap();

        assert!(doc.undo().is_none());
        assert_eq!(doc.get_text(), "abcdef");
    }

    #[test]
    fn revert_to_checkpoint_discards_changes() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
        let cp = doc.create_checkpoint(false, false);
        doc.set_text_in_range(Point::new(0, 3), Point::new(0, 3), "def").unwrap();
        assert_eq!(doc.get_text(), "abcdef");

        doc.revert_to_checkpoint(cp, false).unwrap();
        assert_eq!(doc.get_text(), "abc");
    }

    #[test]
    fn two_replicas_converge_on_concurrent_inserts() {
        let mut a = Document::new(1).unwrap();
        let op_a = a.set_text_in_range(Point::ZERO, Point::ZERO, "A").unwrap();

        let mut b = Document::new(2).unwrap();
        b.integrate_operations(vec![Operation::Splice(op_a.clone())]).unwrap();
        let op_b = b.set_text_in_range(Point::ZERO, Point::ZERO, "B").unwrap();

        a.integrate_operations(vec![Operation::Splice(op_b.clone())]).unwrap();

        assert_eq!(a.get_text(), b.get_text());
    }

    #[test]
    fn marker_set_and_resolve_round_trips() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "hello world").unwrap();

        let mut entries = HashMap::new();
        entries.insert(
            1u32,
            MarkerEntryUpdate::Set(LinearMarker::new(false, false, false, LinearRange::new(Point::new(0, 0), Point::new(0, 5)))),
        );
        let mut layers = MarkerUpdateRequest::new();
        layers.insert(1u32, Some(entries));
        doc.update_markers(layers).unwrap();

        let markers = doc.get_markers();
        let marker = markers[&1][&1][&1];
        assert_eq!(marker.range.start, Point::new(0, 0));
        assert_eq!(marker.range.end, Point::new(0, 5));
    }

    #[test]
    fn get_history_and_restore_round_trips_text() {
        let mut doc = Document::new(1).unwrap();
        doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
        doc.set_text_in_range(Point::new(0, 3), Point::new(0, 3), "def").unwrap();
        doc.undo().unwrap();

        let history = doc.get_history(100);
        assert_eq!(doc.get_text(), "abc", "get_history must not mutate the live document");

        let mut restored = Document::from_history(2, &history).unwrap();
        assert_eq!(restored.get_text(), "abc");
        restored.redo().unwrap();
        assert_eq!(restored.get_text(), "abcdef");
    }

    #[test]
    fn text_updates_merge_across_an_untouched_invisible_tombstone() {
        let mut doc = Document::new(1).unwrap();
        let insert = doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
        // Splits the insertion's segment into "a", "b", "c"; "b" is now an
        // invisible tombstone that sits between the other two.
        doc.set_text_in_range(Point::new(0, 1), Point::new(0, 2), "").unwrap();
        assert_eq!(doc.get_text(), "ac");

        // Undoing the whole "abc" insertion flips "a" and "c" visible -> not,
        // but "b" stays invisible either way (already deleted), so it is never
        // touched: the update for "a" and the update for "c" straddle it.
        let update = doc.apply_remote_undo(UndoOperation { splice_id: insert.splice_id, undo_count: 1 }).unwrap();
        assert_eq!(doc.get_text(), "");
        assert_eq!(
            update.text_updates.len(),
            1,
            "an untouched zero-width tombstone between two touched runs must not split the update in two"
        );
        let u = &update.text_updates[0];
        assert_eq!(u.old_text, "ac");
        assert_eq!(u.new_text, "");
    }
}
