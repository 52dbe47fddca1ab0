//! Each splice gets its own split tree: a splay tree, keyed by
//! offset-within-splice, over the pieces that splice's original insertion
//! has since been cut into. Unlike the document tree, its aggregate
//! (`split_subtree_extent`) is visibility-agnostic — it just tracks raw
//! text extent, since the split tree exists purely to translate
//! offset-in-splice into a concrete current piece.

use crate::error::{ReplicaError, Result};
use crate::point::Point;
use crate::segment::{SegIdx, SegmentArena};
use crate::splay::{self, TreeLinks};

pub struct SplitLinks;

impl TreeLinks for SplitLinks {
    fn parent(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].split_parent
    }
    fn left(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].split_left
    }
    fn right(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
        arena[idx].split_right
    }
    fn set_parent(arena: &mut SegmentArena, idx: SegIdx, parent: Option<SegIdx>) {
        arena[idx].split_parent = parent;
    }
    fn set_left(arena: &mut SegmentArena, idx: SegIdx, left: Option<SegIdx>) {
        arena[idx].split_left = left;
    }
    fn set_right(arena: &mut SegmentArena, idx: SegIdx, right: Option<SegIdx>) {
        arena[idx].split_right = right;
    }
    fn update_aggregate(arena: &mut SegmentArena, idx: SegIdx) {
        let left = arena[idx].split_left;
        let right = arena[idx].split_right;
        let left_extent = left.map(|l| arena[l].split_subtree_extent).unwrap_or(Point::ZERO);
        let right_extent = right.map(|r| arena[r].split_subtree_extent).unwrap_or(Point::ZERO);
        let seg = &mut arena[idx];
        seg.split_subtree_extent = left_extent.traverse(&seg.extent).traverse(&right_extent);
    }
}

/// Splays `idx`'s split tree so `idx` becomes its root, and returns that
/// root. The tree's identity is just "whatever `idx` is reachable from";
/// callers hold a stable entry-point `SegIdx` per splice (the splice's first
/// piece) and climb to the current root on demand.
pub fn splay(arena: &mut SegmentArena, idx: SegIdx) -> SegIdx {
    splay::splay::<SplitLinks>(arena, idx)
}

pub fn find_root(arena: &SegmentArena, idx: SegIdx) -> SegIdx {
    splay::find_root::<SplitLinks>(arena, idx)
}

pub fn successor(arena: &SegmentArena, idx: SegIdx) -> Option<SegIdx> {
    splay::successor::<SplitLinks>(arena, idx)
}

/// Finds the piece containing `offset` within the splice reachable from
/// `entry_point`, splaying it to the root. `offset` may equal the total
/// extent of the splice (the end boundary), in which case the last piece is
/// returned.
pub fn find_segment_containing_offset(
    arena: &mut SegmentArena,
    entry_point: SegIdx,
    offset: Point,
) -> Result<SegIdx> {
    let mut node = find_root(arena, entry_point);
    let mut preceding = Point::ZERO;
    loop {
        let left_extent = arena[node].split_left.map(|l| arena[l].split_subtree_extent).unwrap_or(Point::ZERO);
        let start = preceding.traverse(&left_extent);
        let end = start.traverse(&arena[node].extent);

        if offset < start {
            node = arena[node].split_left.ok_or(ReplicaError::SegmentNotFound)?;
            continue;
        }
        if offset > end {
            preceding = end;
            node = arena[node].split_right.ok_or(ReplicaError::SegmentNotFound)?;
            continue;
        }
        if offset == end {
            // Prefer the piece itself unless there's a next piece and the
            // offset is the shared boundary; the end-of-splice case (no
            // right child) always resolves to this piece.
            if let Some(r) = arena[node].split_right {
                preceding = end;
                node = r;
                continue;
            }
        }
        return Ok(splay(arena, node));
    }
}

/// Splits `segment` at `offset_in_segment` (relative to `segment.offset`),
/// producing a suffix piece that inherits `deletions`, the `next_split`
/// chain link, and the split-tree right subtree. The document tree is not
/// touched here; the caller mirrors the split with
/// [`crate::doc_tree::DocumentTree::split_segment`].
pub fn split_segment(arena: &mut SegmentArena, segment: SegIdx, offset_in_segment: Point) -> SegIdx {
    debug_assert!(!offset_in_segment.is_zero());
    debug_assert!(offset_in_segment < arena[segment].extent);

    let prefix_text_len = byte_len_for_extent(&arena[segment].text, offset_in_segment);
    let suffix_text: smartstring::alias::String = arena[segment].text[prefix_text_len..].into();
    let prefix_text: smartstring::alias::String = arena[segment].text[..prefix_text_len].into();

    let mut suffix = crate::segment::Segment::new(
        arena[segment].splice_id,
        arena[segment].offset.traverse(&offset_in_segment),
        suffix_text,
        // Both halves of a split share the original insertion's causal
        // dependency window; only the split tree distinguishes them now.
        arena[segment].left_dependency,
        arena[segment].right_dependency,
    );
    suffix.deletions = arena[segment].deletions.clone();
    suffix.visible = arena[segment].visible;
    suffix.next_split = arena[segment].next_split;
    let suffix_idx = arena.push(suffix);

    arena[segment].text = prefix_text;
    arena[segment].extent = offset_in_segment;
    arena[segment].next_split = Some(suffix_idx);

    splay(arena, segment);
    let right = arena[segment].split_right;
    arena[segment].split_right = None;
    arena[suffix_idx].split_left = Some(segment);
    arena[suffix_idx].split_right = right;
    arena[segment].split_parent = Some(suffix_idx);
    if let Some(r) = right {
        arena[r].split_parent = Some(suffix_idx);
    }
    arena[suffix_idx].split_parent = None;
    SplitLinks::update_aggregate(arena, segment);
    SplitLinks::update_aggregate(arena, suffix_idx);

    suffix_idx
}

/// Byte length of the text prefix whose `Point` extent is `target`. `target`
/// must land on a character boundary (callers only split at positions
/// derived from other `Point` extents, never mid-codepoint).
fn byte_len_for_extent(text: &str, target: Point) -> usize {
    if target.is_zero() {
        return 0;
    }
    let mut row = 0u32;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            row += 1;
            if row == target.row {
                let col_start = i + 1;
                return col_start + target.column as usize;
            }
        }
    }
    debug_assert_eq!(target.row, 0, "offset beyond text extent");
    target.column as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::splice_id::{SpliceAnchor, SpliceId};

    fn entry(text: &str) -> (SegmentArena, SegIdx) {
        let mut arena = SegmentArena::new();
        let id = SpliceId::new(1, 1);
        let anchor = SpliceAnchor::new(SpliceId::new(0, 0), Point::ZERO);
        let idx = arena.push(Segment::new(id, Point::ZERO, text.into(), anchor, anchor));
        (arena, idx)
    }

    #[test]
    fn split_segment_divides_text_at_the_right_offset() {
        let (mut arena, whole) = entry("hello world");
        let suffix = split_segment(&mut arena, whole, Point::new(0, 5));

        assert_eq!(&arena[whole].text, "hello");
        assert_eq!(&arena[suffix].text, " world");
        assert_eq!(arena[whole].extent, Point::new(0, 5));
        assert_eq!(arena[suffix].offset, Point::new(0, 5));
        assert_eq!(arena[whole].next_split, Some(suffix));
    }

    #[test]
    fn split_segment_inherits_deletions_and_visibility() {
        let (mut arena, whole) = entry("abcdef");
        let deleter = SpliceId::new(2, 7);
        arena[whole].deletions.push(deleter);
        arena[whole].visible = false;

        let suffix = split_segment(&mut arena, whole, Point::new(0, 3));
        assert_eq!(arena[suffix].deletions.as_slice(), &[deleter]);
        assert!(!arena[suffix].visible);
    }

    #[test]
    fn find_segment_containing_offset_after_multiple_splits() {
        let (mut arena, whole) = entry("0123456789");
        let second = split_segment(&mut arena, whole, Point::new(0, 4));
        let third = split_segment(&mut arena, second, Point::new(0, 3));

        assert_eq!(
            find_segment_containing_offset(&mut arena, whole, Point::new(0, 0)).unwrap(),
            whole
        );
        assert_eq!(
            find_segment_containing_offset(&mut arena, whole, Point::new(0, 5)).unwrap(),
            second
        );
        assert_eq!(
            find_segment_containing_offset(&mut arena, whole, Point::new(0, 8)).unwrap(),
            third
        );
        // The end-of-splice boundary resolves to the last piece.
        assert_eq!(
            find_segment_containing_offset(&mut arena, whole, Point::new(0, 10)).unwrap(),
            third
        );
    }
}
