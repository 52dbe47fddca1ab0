//! The document tree: a splay tree over every segment the replica
//! has ever created, ordered by document position, carrying two
//! subtree-aggregate fields — visible extent and segment count — so text
//! extraction, position lookup and integer indexing are all amortized
//! logarithmic.

use crate::error::{ReplicaError, Result};
use crate::point::Point;
use crate::segment::{SegIdx, SegmentArena};
use crate::splay::{self, TreeLinks};

/// [`TreeLinks`] over a segment's document-tree fields.
pub struct DocLinks;

impl TreeLinks for DocLinks {
    fn parent(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].doc_parent
    }
    fn left(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].doc_left
    }
    fn right(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].doc_right
    }
    fn set_parent(arena: &mut SegmentArena, idx: SegIdx, parent: Option<SegIdx>) {
        arena[idx].doc_parent = parent;
    }
    fn set_left(arena: &mut SegmentArena, idx: SegIdx, left: Option<SegIdx>) {
        arena[idx].doc_left = left;
    }
    fn set_right(arena: &mut SegmentArena, idx: SegIdx, right: Option<SegIdx>) {
        arena[idx].doc_right = right;
    }
    fn update_aggregate(arena: &mut SegmentArena, idx: SegIdx) {
        let left = arena[idx].doc_left;
        let right = arena[idx].doc_right;
        let left_extent = left.map(|l| arena[l].doc_subtree_visible_extent).unwrap_or(Point::ZERO);
        let right_extent = right.map(|r| arena[r].doc_subtree_visible_extent).unwrap_or(Point::ZERO);
        let own_extent = if arena[idx].visible { arena[idx].extent } else { Point::ZERO };
        let left_size = left.map(|l| arena[l].doc_subtree_size).unwrap_or(0);
        let right_size = right.map(|r| arena[r].doc_subtree_size).unwrap_or(0);

        let seg = &mut arena[idx];
        seg.doc_subtree_visible_extent = left_extent.traverse(&own_extent).traverse(&right_extent);
        seg.doc_subtree_size = left_size + right_size + 1;
    }
}

/// The replica's single global ordered index of segments.
#[derive(Debug, Default)]
pub struct DocumentTree {
    root: Option<SegIdx>,
}

impl DocumentTree {
    pub fn new() -> Self {
        DocumentTree { root: None }
    }

    pub fn root(&self) -> Option<SegIdx> {
        self.root
    }

    pub fn visible_extent(&self, arena: &SegmentArena) -> Point {
        self.root.map(|r| arena[r].doc_subtree_visible_extent).unwrap_or(Point::ZERO)
    }

    fn splay(&mut self, arena: &mut SegmentArena, idx: SegIdx) {
        self.root = Some(splay::splay::<DocLinks>(arena, idx));
    }

    /// Seats the very first segment (the start sentinel) as the sole node.
    pub fn seed(&mut self, arena: &mut SegmentArena, idx: SegIdx) {
        debug_assert!(self.root.is_none());
        DocLinks::update_aggregate(arena, idx);
        self.root = Some(idx);
    }

    /// Seeds a brand-new two-node tree: `first` as root, `second` as its
    /// right child. Used once, at construction, to seat the two sentinels
    /// before `insert_between` has anything to splay.
    pub fn seed_pair(&mut self, arena: &mut SegmentArena, first: SegIdx, second: SegIdx) {
        debug_assert!(self.root.is_none());
        arena[first].doc_right = Some(second);
        arena[second].doc_parent = Some(first);
        DocLinks::update_aggregate(arena, second);
        DocLinks::update_aggregate(arena, first);
        self.root = Some(first);
    }

    /// Inserts `new` between `prev` and `next`, which must currently be
    /// document-tree neighbors (`next` is `prev`'s immediate successor, or
    /// `prev` is absent and `next` is the first node, or symmetrically).
    pub fn insert_between(
        &mut self,
        arena: &mut SegmentArena,
        prev: SegIdx,
        next: SegIdx,
        new: SegIdx,
    ) {
        self.splay(arena, prev);
        self.splay(arena, next);
        // After splaying next to the root with prev already splayed once,
        // prev (still prev's old subtree) sits as next's left child iff
        // prev has no right child (true for true document-tree neighbors).
        debug_assert_eq!(arena[next].doc_left, Some(prev));
        debug_assert!(arena[prev].doc_right.is_none());

        arena[new].doc_left = Some(prev);
        arena[new].doc_right = Some(next);
        arena[prev].doc_parent = Some(new);
        arena[next].doc_parent = Some(new);
        arena[next].doc_left = None;
        arena[new].doc_parent = None;

        DocLinks::update_aggregate(arena, prev);
        DocLinks::update_aggregate(arena, next);
        DocLinks::update_aggregate(arena, new);
        self.root = Some(new);
    }

    /// Splits the document tree so that `suffix` (already unlinked) takes
    /// over as the right sibling of `prefix`, inheriting `prefix`'s former
    /// right subtree.
    pub fn split_segment(&mut self, arena: &mut SegmentArena, prefix: SegIdx, suffix: SegIdx) {
        self.splay(arena, prefix);
        let right = arena[prefix].doc_right;
        arena[prefix].doc_right = None;
        arena[suffix].doc_left = Some(prefix);
        arena[suffix].doc_right = right;
        arena[prefix].doc_parent = Some(suffix);
        if let Some(r) = right {
            arena[r].doc_parent = Some(suffix);
        }
        arena[suffix].doc_parent = None;
        DocLinks::update_aggregate(arena, prefix);
        DocLinks::update_aggregate(arena, suffix);
        self.root = Some(suffix);
    }

    /// Re-derives `idx`'s document-tree aggregate after its `visible` flag
    /// or `extent` changed, propagating up to the root.
    pub fn refresh(&mut self, arena: &mut SegmentArena, idx: SegIdx) {
        self.splay(arena, idx);
        DocLinks::update_aggregate(arena, idx);
    }

    pub fn successor(&self, arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        splay::successor::<DocLinks>(arena, idx)
    }

    pub fn predecessor(&self, arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        splay::predecessor::<DocLinks>(arena, idx)
    }

    /// 0-based index of `idx` among all segments (visible or not), used by
    /// the integration ordering rule's `.index` comparisons.
    pub fn get_segment_index(&mut self, arena: &mut SegmentArena, idx: SegIdx) -> u32 {
        self.splay(arena, idx);
        arena[idx].doc_left.map(|l| arena[l].doc_subtree_size).unwrap_or(0)
    }

    /// Linear visible-extent position of `idx`'s start.
    pub fn get_segment_position(&mut self, arena: &mut SegmentArena, idx: SegIdx) -> Point {
        self.splay(arena, idx);
        arena[idx].doc_left.map(|l| arena[l].doc_subtree_visible_extent).unwrap_or(Point::ZERO)
    }

    /// Finds the segment whose visible span `[start, end)` contains linear
    /// position `p`. The first sentinel (empty, at the very start) is never
    /// returned for `p == Point::ZERO`; descent continues rightward to the
    /// first real segment in that case.
    pub fn find_segment_containing_position(
        &mut self,
        arena: &mut SegmentArena,
        p: Point,
    ) -> Result<(SegIdx, Point, Point)> {
        let mut node = self.root.ok_or(ReplicaError::SegmentNotFound)?;
        let mut preceding = Point::ZERO;
        loop {
            let left_extent = arena[node].doc_left.map(|l| arena[l].doc_subtree_visible_extent).unwrap_or(Point::ZERO);
            let start = preceding.traverse(&left_extent);
            let own_extent = if arena[node].visible { arena[node].extent } else { Point::ZERO };
            let end = start.traverse(&own_extent);

            if p < start {
                node = arena[node].doc_left.ok_or(ReplicaError::PositionOutOfRange)?;
                continue;
            }
            if p > end {
                preceding = end;
                node = arena[node].doc_right.ok_or(ReplicaError::PositionOutOfRange)?;
                continue;
            }
            // start <= p <= end
            if p == start && own_extent.is_zero() {
                // Zero-width (invisible, or the start sentinel): keep
                // descending right for a real match, unless this is the
                // only node left.
                if let Some(r) = arena[node].doc_right {
                    preceding = end;
                    node = r;
                    continue;
                }
            }
            return Ok((node, start, end));
        }
    }

    pub fn get_segments(&self, arena: &SegmentArena) -> Vec<SegIdx> {
        splay::in_order::<DocLinks>(arena, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::splice_id::{SpliceAnchor, SpliceId};

    fn seg(site: u32, seq: u32, text: &str) -> Segment {
        let id = SpliceId::new(site, seq);
        let anchor = SpliceAnchor::new(id, Point::ZERO);
        Segment::new(id, Point::ZERO, text.into(), anchor, anchor)
    }

    #[test]
    fn insert_between_keeps_in_order_sequence() {
        let mut arena = SegmentArena::new();
        let mut tree = DocumentTree::new();

        let start = arena.push(seg(0, 0, ""));
        let end = arena.push(seg(0, 1, ""));
        tree.seed_pair(&mut arena, start, end);

        let a = arena.push(seg(1, 1, "a"));
        tree.insert_between(&mut arena, start, end, a);
        let b = arena.push(seg(1, 2, "b"));
        tree.insert_between(&mut arena, a, end, b);
        let c = arena.push(seg(1, 3, "c"));
        tree.insert_between(&mut arena, a, b, c);

        let order = tree.get_segments(&arena);
        assert_eq!(order, vec![start, a, c, b, end]);
        assert_eq!(tree.visible_extent(&arena), Point::new(0, 3));
    }

    #[test]
    fn split_segment_preserves_total_extent() {
        let mut arena = SegmentArena::new();
        let mut tree = DocumentTree::new();

        let start = arena.push(seg(0, 0, ""));
        let end = arena.push(seg(0, 1, ""));
        tree.seed_pair(&mut arena, start, end);

        let whole = arena.push(seg(1, 1, "hello"));
        tree.insert_between(&mut arena, start, end, whole);

        let suffix = arena.push(seg(1, 1, "llo"));
        arena[whole].text = "he".into();
        arena[whole].extent = Point::new(0, 2);
        tree.split_segment(&mut arena, whole, suffix);

        assert_eq!(tree.visible_extent(&arena), Point::new(0, 5));
        assert_eq!(tree.get_segments(&arena), vec![start, whole, suffix, end]);
    }

    #[test]
    fn find_segment_containing_position_skips_zero_width_start_sentinel() {
        let mut arena = SegmentArena::new();
        let mut tree = DocumentTree::new();

        let start = arena.push(seg(0, 0, ""));
        let end = arena.push(seg(0, 1, ""));
        tree.seed_pair(&mut arena, start, end);

        let a = arena.push(seg(1, 1, "abc"));
        tree.insert_between(&mut arena, start, end, a);

        let (found, seg_start, seg_end) =
            tree.find_segment_containing_position(&mut arena, Point::ZERO).unwrap();
        assert_eq!(found, a);
        assert_eq!(seg_start, Point::ZERO);
        assert_eq!(seg_end, Point::new(0, 3));
    }

    #[test]
    fn get_segment_index_counts_left_subtree_sizes() {
        let mut arena = SegmentArena::new();
        let mut tree = DocumentTree::new();

        let start = arena.push(seg(0, 0, ""));
        let end = arena.push(seg(0, 1, ""));
        tree.seed_pair(&mut arena, start, end);

        let a = arena.push(seg(1, 1, "a"));
        tree.insert_between(&mut arena, start, end, a);
        let b = arena.push(seg(1, 2, "b"));
        tree.insert_between(&mut arena, a, end, b);

        assert_eq!(tree.get_segment_index(&mut arena, start), 0);
        assert_eq!(tree.get_segment_index(&mut arena, a), 1);
        assert_eq!(tree.get_segment_index(&mut arena, b), 2);
        assert_eq!(tree.get_segment_index(&mut arena, end), 3);
    }
}
