//! Marker types. A marker is a tagged selection range; its
//! canonical, edit-stable form anchors both endpoints to `(SpliceId,
//! offsetInSplice)` pairs rather than linear positions. Resolution to and
//! from linear `Point` ranges lives on [`crate::document::Document`], since
//! it needs the split/document trees; this module only holds the shapes.

use crate::point::Point;
use crate::splice_id::SpliceAnchor;

pub type SiteId = u32;
pub type LayerId = u32;
pub type MarkerId = u32;

/// A linear `[start, end)` range in `Point` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinearRange {
    pub start: Point,
    pub end: Point,
}

impl LinearRange {
    pub fn new(start: Point, end: Point) -> Self {
        LinearRange { start, end }
    }
}

/// A range expressed as two anchors that survive remote edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalRange {
    pub start: SpliceAnchor,
    pub end: SpliceAnchor,
}

impl LogicalRange {
    pub fn new(start: SpliceAnchor, end: SpliceAnchor) -> Self {
        LogicalRange { start, end }
    }
}

/// `Marker<Range>`: a tagged selection range, generic over whether
/// `Range` is the wire/linear form or the replica's internal logical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker<R> {
    pub exclusive: bool,
    pub reversed: bool,
    pub tailed: bool,
    pub range: R,
}

impl<R> Marker<R> {
    pub fn new(exclusive: bool, reversed: bool, tailed: bool, range: R) -> Self {
        Marker { exclusive, reversed, tailed, range }
    }

    pub fn map_range<S>(&self, f: impl FnOnce(&R) -> S) -> Marker<S> {
        Marker {
            exclusive: self.exclusive,
            reversed: self.reversed,
            tailed: self.tailed,
            range: f(&self.range),
        }
    }
}

pub type LinearMarker = Marker<LinearRange>;
pub type LogicalMarker = Marker<LogicalRange>;

/// One requested change to a marker within a layer: set it, or remove it.
#[derive(Debug, Clone)]
pub enum MarkerEntryUpdate {
    Set(LinearMarker),
    Remove,
}

/// The layer-update requests for one call to `Document::update_markers`:
/// `layer_id -> None` removes the whole layer; `layer_id -> Some(entries)`
/// applies each `(marker_id, update)` within that layer. Absent markers and
/// absent layers are left unchanged.
pub type MarkerUpdateRequest =
    std::collections::HashMap<LayerId, Option<std::collections::HashMap<MarkerId, MarkerEntryUpdate>>>;
