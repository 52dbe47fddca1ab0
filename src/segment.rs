//! [`Segment`]s are the atomic units of text the document tree and split
//! tree both index. A cyclic tree-of-objects shape doesn't fit Rust's
//! ownership model, so segments live in a flat arena and every
//! tree/list pointer is an index into it.

use smallvec::SmallVec;
use smartstring::alias::String as SmartString;
use std::ops::{Index, IndexMut};

use crate::point::Point;
use crate::splice_id::{SpliceAnchor, SpliceId};

/// An index into a [`SegmentArena`]. Segments are never removed from the
/// arena (segments are retained indefinitely as tombstones), so
/// a `SegIdx` handed out once stays valid for the replica's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegIdx(pub u32);

/// One contiguous piece of text produced by a single splice. A splice's
/// original insertion may later be cut into several segments by concurrent
/// operations that land inside it; each piece keeps its own `deletions` set
/// and participates in both the document tree and its splice's split tree.
#[derive(Debug, Clone)]
pub struct Segment {
    pub splice_id: SpliceId,
    /// This piece's offset within the splice's own inserted text.
    pub offset: Point,
    pub text: SmartString,
    pub extent: Point,
    /// SpliceIds of deletions currently covering this piece.
    pub deletions: SmallVec<[SpliceId; 2]>,
    pub left_dependency: SpliceAnchor,
    pub right_dependency: SpliceAnchor,
    /// Cached visibility, maintained incrementally by the
    /// document as undo counts and deletions change. The document tree's
    /// `visible_extent` aggregate reads this rather than recomputing it from
    /// the undo-count map on every splay.
    pub visible: bool,

    // --- document tree links ---
    pub(crate) doc_parent: Option<SegIdx>,
    pub(crate) doc_left: Option<SegIdx>,
    pub(crate) doc_right: Option<SegIdx>,
    pub(crate) doc_subtree_size: u32,
    pub(crate) doc_subtree_visible_extent: Point,

    // --- split tree links (per splice) ---
    pub(crate) split_parent: Option<SegIdx>,
    pub(crate) split_left: Option<SegIdx>,
    pub(crate) split_right: Option<SegIdx>,
    pub(crate) split_subtree_extent: Point,
    /// Linear successor within the same splice's split tree, independent of
    /// the splay tree's current shape.
    pub(crate) next_split: Option<SegIdx>,
}

impl Segment {
    pub(crate) fn new(
        splice_id: SpliceId,
        offset: Point,
        text: SmartString,
        left_dependency: SpliceAnchor,
        right_dependency: SpliceAnchor,
    ) -> Self {
        let extent = Point::extent_of(&text);
        Segment {
            splice_id,
            offset,
            text,
            extent,
            deletions: SmallVec::new(),
            left_dependency,
            right_dependency,
            visible: !splice_id.is_sentinel(),
            doc_parent: None,
            doc_left: None,
            doc_right: None,
            doc_subtree_size: 1,
            doc_subtree_visible_extent: Point::ZERO,
            split_parent: None,
            split_left: None,
            split_right: None,
            split_subtree_extent: extent,
            next_split: None,
        }
    }

    /// `(spliceId, offset)` identifying this piece's own start, usable as a
    /// dependency anchor for pieces inserted immediately after it.
    pub fn start_anchor(&self) -> SpliceAnchor {
        SpliceAnchor::new(self.splice_id, self.offset)
    }

    /// `(spliceId, offset)` identifying this piece's end.
    pub fn end_anchor(&self) -> SpliceAnchor {
        SpliceAnchor::new(self.splice_id, self.offset.traverse(&self.extent))
    }
}

/// Flat storage for every [`Segment`] a replica has ever created.
#[derive(Debug, Default)]
pub struct SegmentArena {
    segments: Vec<Segment>,
}

impl SegmentArena {
    pub fn new() -> Self {
        SegmentArena { segments: Vec::new() }
    }

    pub fn push(&mut self, segment: Segment) -> SegIdx {
        let idx = SegIdx(self.segments.len() as u32);
        self.segments.push(segment);
        idx
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

impl Index<SegIdx> for SegmentArena {
    type Output = Segment;
    #[inline]
    fn index(&self, idx: SegIdx) -> &Segment {
        &self.segments[idx.0 as usize]
    }
}

impl IndexMut<SegIdx> for SegmentArena {
    #[inline]
    fn index_mut(&mut self, idx: SegIdx) -> &mut Segment {
        &mut self.segments[idx.0 as usize]
    }
}
