//! A replicated, real-time collaborative text-editing core built on a
//! Conflict-free Replicated Data Type (CRDT).
//!
//! Each [`Document`] is a full replica of a shared document. It accepts
//! local edits via [`Document::set_text_in_range`], emits
//! [`operation::SpliceOperation`]s for broadcast, and integrates operations
//! from peers via [`Document::integrate_operations`]. Replicas that have
//! integrated the same set of operations converge to the same text and the
//! same resolved marker ranges, independent of delivery order.
//!
//! Networking, wire serialization, persistence of the operation log, and
//! editor/UI integration are out of scope; this crate models the replica
//! only.

mod clock;
mod doc_tree;
mod document;
mod error;
mod history;
mod marker;
mod operation;
mod point;
mod segment;
mod splay;
mod splice_id;
mod split_tree;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::Document;
pub use error::{ReplicaError, Result};
pub use history::{
    CheckpointRecord, History, HistoryRecord, HistoryTransactionRecord, MarkerSnapshot,
    RecordedOp, TransactionRecord, UndoHistory, UndoRecord,
};
pub use marker::{
    LayerId, LinearMarker, LinearRange, LogicalMarker, LogicalRange, Marker, MarkerEntryUpdate,
    MarkerId, MarkerUpdateRequest, SiteId,
};
pub use operation::{
    DocumentStateUpdate, MarkerDelta, MarkerMap, MarkersUpdateOperation, Operation,
    SpliceOperation, TextDeletionMod, TextInsertionMod, TextUpdate, UndoOperation, UndoRedoResult,
    WireMarkerEntry,
};
pub use point::Point;
pub use splice_id::{SpliceAnchor, SpliceId, SENTINEL_SITE};
