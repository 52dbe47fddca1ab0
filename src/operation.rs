//! Public operation and update record shapes. These are the only
//! values that cross the replica boundary: a transport ships
//! [`Operation`]s between replicas, and a host editor consumes
//! [`TextUpdate`]s and marker maps out of every call that touches the
//! document.
//!
//! Representation on the wire is out of scope — these are plain data,
//! with equality defined structurally: "two operations
//! compare equal iff their record fields compare equal."

use std::collections::HashMap;

use crate::marker::{LayerId, LogicalMarker, MarkerId, SiteId};
use crate::point::Point;
use crate::splice_id::SpliceId;

/// `TextInsertionMod`: the insertion half of a splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInsertionMod {
    pub text: smartstring::alias::String,
    pub left_dependency_id: SpliceId,
    pub offset_in_left_dependency: Point,
    pub right_dependency_id: SpliceId,
    pub offset_in_right_dependency: Point,
}

/// `TextDeletionMod`: the deletion half of a splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDeletionMod {
    pub max_sequence_number_by_site: HashMap<SiteId, u32>,
    pub left_dependency_id: SpliceId,
    pub offset_in_left_dependency: Point,
    pub right_dependency_id: SpliceId,
    pub offset_in_right_dependency: Point,
}

/// `SpliceOperation`: what one local `set_text_in_range` call
/// produces for broadcast. At least one of `deletion`/`insertion` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceOperation {
    pub splice_id: SpliceId,
    pub deletion: Option<TextDeletionMod>,
    pub insertion: Option<TextInsertionMod>,
}

/// `UndoOperation`: the new absolute undo count for `splice_id`.
/// Integration is max-wins over the previously known count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoOperation {
    pub splice_id: SpliceId,
    pub undo_count: u32,
}

/// One marker update within a layer, as carried on the wire: `Some(marker)`
/// sets it, `None` removes it.
pub type WireMarkerEntry = Option<LogicalMarker>;

/// `MarkersUpdateOperation`. `updates[layer] == None` means "remove
/// this layer for the site"; within a present layer, `markers[id] == None`
/// means "remove this marker"; absent keys at either level mean unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkersUpdateOperation {
    pub site_id: SiteId,
    pub updates: HashMap<LayerId, Option<HashMap<MarkerId, WireMarkerEntry>>>,
}

/// The closed sum of values a transport may deliver to
/// `Document::integrate_operations` (a closed sum type, dispatched on tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Splice(SpliceOperation),
    Undo(UndoOperation),
    MarkersUpdate(MarkersUpdateOperation),
}

/// `TextUpdate`: one linear edit a host editor's buffer should apply.
/// A list of these, applied in reverse order as
/// `buffer.splice(old_start, old_end, new_text)`, transforms the pre-change
/// linear document into the post-change one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUpdate {
    pub old_start: Point,
    pub old_end: Point,
    pub old_text: smartstring::alias::String,
    pub new_start: Point,
    pub new_end: Point,
    pub new_text: smartstring::alias::String,
}

/// Per-site, per-layer, per-marker linear marker map, as returned to hosts.
pub type MarkerMap = HashMap<SiteId, HashMap<LayerId, HashMap<MarkerId, crate::marker::LinearMarker>>>;

/// Per-site, per-layer, per-marker update delta: `None` at any level means
/// "removed"; this is the shape `DocumentStateUpdate::marker_updates` and
/// `UndoRedoResult::markers` use to report only what changed.
pub type MarkerDelta =
    HashMap<SiteId, HashMap<LayerId, HashMap<MarkerId, Option<crate::marker::LinearMarker>>>>;

/// `DocumentStateUpdate`: what every local or remote mutation produces
/// for the host to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentStateUpdate {
    pub text_updates: Vec<TextUpdate>,
    pub marker_updates: MarkerDelta,
}

impl DocumentStateUpdate {
    pub fn is_empty(&self) -> bool {
        self.text_updates.is_empty() && self.marker_updates.is_empty()
    }
}

/// `UndoRedoResult`: the outcome of a successful `undo`/`redo`/
/// `revert_to_checkpoint` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UndoRedoResult {
    pub operations: Vec<UndoOperation>,
    pub text_updates: Vec<TextUpdate>,
    pub markers: Option<MarkerDelta>,
}
