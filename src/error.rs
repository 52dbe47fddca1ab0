use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors surfaced to callers of [`crate::Document`]. None of these are
/// recovered internally; see the module docs for which ones can actually
/// occur in this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplicaError {
    /// `Document::new` was called with the reserved site id `0`.
    ReservedSiteId,
    /// A local `set_text_in_range` call observed a per-site sequence
    /// counter inconsistent with the next splice id. Unreachable under
    /// correct use of the public API.
    OutOfOrderLocalOperation,
    /// Integration saw an operation variant it does not recognize.
    ///
    /// The Rust `Operation` enum is matched exhaustively, so this variant
    /// cannot actually be produced by this crate; it's kept for parity
    /// with the external error contract other implementations expose.
    UnknownOperationKind,
    /// An undo-stack scan saw a record variant it does not recognize.
    ///
    /// As with `UnknownOperationKind`, `UndoRecord` is matched
    /// exhaustively in Rust, so this is unreachable here.
    UnknownUndoRecordKind,
    /// A requested linear position lies beyond the document's visible
    /// extent.
    PositionOutOfRange,
    /// A tree lookup hit a null branch where one was required to exist.
    /// Indicates a broken internal invariant.
    SegmentNotFound,
}

impl Display for ReplicaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplicaError {:?}", self)
    }
}

impl Error for ReplicaError {}

pub type Result<T> = std::result::Result<T, ReplicaError>;
