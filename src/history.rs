//! The undo stack: a LIFO of [`UndoRecord`]s, newest on top,
//! local to this replica (history does not merge across sites, per its
//! non-goals). This module owns the stack bookkeeping — push, pop, barrier
//! scanning, transaction merging — while [`crate::document::Document`]
//! supplies the CRDT-level effects (computing text updates, resolving
//! markers) that accompany each transition.

use std::collections::HashMap;

use crate::marker::{LayerId, LogicalMarker, MarkerId, SiteId};
use crate::operation::{SpliceOperation, TextUpdate, UndoOperation};

/// A snapshot of every site's resolved logical markers, stored on
/// transactions and checkpoints so they survive later edits.
pub type MarkerSnapshot = HashMap<SiteId, HashMap<LayerId, HashMap<MarkerId, LogicalMarker>>>;

/// One modification recorded within a transaction: either half of a local
/// splice, or a counter-undo produced by a previous undo/redo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    Splice(SpliceOperation),
    Undo(UndoOperation),
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub timestamp: u64,
    pub grouping_interval: Option<u64>,
    pub operations: Vec<RecordedOp>,
    pub markers_before: Option<MarkerSnapshot>,
    pub markers_after: Option<MarkerSnapshot>,
}

#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub id: u64,
    pub is_barrier: bool,
    pub markers_snapshot: Option<MarkerSnapshot>,
}

/// `UndoRecord`: a transaction or an addressable checkpoint.
#[derive(Debug, Clone)]
pub enum UndoRecord {
    Transaction(TransactionRecord),
    Checkpoint(CheckpointRecord),
}

impl UndoRecord {
    pub fn as_transaction(&self) -> Option<&TransactionRecord> {
        match self {
            UndoRecord::Transaction(t) => Some(t),
            _ => None,
        }
    }
}

/// One transaction as stored in a [`History`] snapshot: unlike the live
/// [`TransactionRecord`], it carries linear `TextUpdate`s rather than CRDT
/// operations, so a fresh replica can replay it as ordinary local edits
/// without needing any of the originating replica's internal segment ids.
/// For a transaction that's still on the live undo stack, `changes`
/// is stored in "redo" orientation — applying it forward reproduces what
/// the transaction originally did.
#[derive(Debug, Clone)]
pub struct HistoryTransactionRecord {
    pub timestamp: u64,
    pub grouping_interval: Option<u64>,
    pub changes: Vec<TextUpdate>,
    pub markers_before: Option<MarkerSnapshot>,
    pub markers_after: Option<MarkerSnapshot>,
}

/// A record within a [`History`] snapshot.
#[derive(Debug, Clone)]
pub enum HistoryRecord {
    Transaction(HistoryTransactionRecord),
    Checkpoint(CheckpointRecord),
}

/// `History`: a read-only, fully materialized snapshot suitable
/// for restoring a fresh replica via `Document::new(site_id, history)`.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub base_text: Option<smartstring::alias::String>,
    pub next_checkpoint_id: u64,
    pub undo_stack: Vec<HistoryRecord>,
    pub redo_stack: Vec<HistoryRecord>,
}

/// The live undo/redo stacks plus checkpoint-id allocation.
#[derive(Debug, Default)]
pub struct UndoHistory {
    pub undo_stack: Vec<UndoRecord>,
    pub redo_stack: Vec<UndoRecord>,
    next_checkpoint_id: u64,
}

impl UndoHistory {
    pub fn new() -> Self {
        UndoHistory { undo_stack: Vec::new(), redo_stack: Vec::new(), next_checkpoint_id: 0 }
    }

    pub fn clear_redo(&mut self) {
        self.redo_stack.clear();
    }

    pub fn push_transaction(&mut self, txn: TransactionRecord) {
        self.undo_stack.push(UndoRecord::Transaction(txn));
    }

    pub fn create_checkpoint(&mut self, is_barrier: bool, markers_snapshot: Option<MarkerSnapshot>) -> u64 {
        let id = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;
        self.undo_stack.push(UndoRecord::Checkpoint(CheckpointRecord { id, is_barrier, markers_snapshot }));
        id
    }

    /// Scans the undo stack top-down for the first transaction. Returns
    /// `None` (refusing the undo) if a barrier checkpoint is hit first.
    /// On success, pops every record from the top down to and including the
    /// transaction, pushes them (in the same order popped) onto the redo
    /// stack, and returns the transaction's operations.
    pub fn pop_for_undo(&mut self) -> Option<TransactionRecord> {
        let mut i = self.undo_stack.len();
        loop {
            if i == 0 {
                return None;
            }
            i -= 1;
            match &self.undo_stack[i] {
                UndoRecord::Checkpoint(c) if c.is_barrier => return None,
                UndoRecord::Transaction(_) => break,
                UndoRecord::Checkpoint(_) => continue,
            }
        }
        let moved: Vec<UndoRecord> = self.undo_stack.split_off(i);
        let txn = moved[0].as_transaction().expect("scan located a transaction").clone();
        for rec in moved {
            self.redo_stack.push(rec);
        }
        Some(txn)
    }

    /// Symmetric to [`Self::pop_for_undo`], scanning the redo stack. After
    /// moving the transaction (and everything above it) back onto the undo
    /// stack, also moves any run of trailing checkpoints immediately above
    /// it on the (now-shrunk) redo stack back onto the undo stack.
    pub fn pop_for_redo(&mut self) -> Option<TransactionRecord> {
        let mut i = self.redo_stack.len();
        loop {
            if i == 0 {
                return None;
            }
            i -= 1;
            if matches!(self.redo_stack[i], UndoRecord::Transaction(_)) {
                break;
            }
        }
        let moved: Vec<UndoRecord> = self.redo_stack.split_off(i);
        let txn = moved[0].as_transaction().expect("scan located a transaction").clone();
        for rec in moved {
            self.undo_stack.push(rec);
        }
        while matches!(self.redo_stack.last(), Some(UndoRecord::Checkpoint(_))) {
            let rec = self.redo_stack.pop().unwrap();
            self.undo_stack.push(rec);
        }
        Some(txn)
    }

    /// The checkpoint named `id`'s stack position, or `None` if a barrier
    /// checkpoint lies anywhere below it, or `id` isn't found at all.
    fn barrier_blocks(&self, id: u64) -> Option<usize> {
        let pos = self.undo_stack.iter().position(|r| matches!(r, UndoRecord::Checkpoint(c) if c.id == id))?;
        for rec in &self.undo_stack[..pos] {
            if let UndoRecord::Checkpoint(c) = rec {
                if c.is_barrier {
                    return None;
                }
            }
        }
        Some(pos)
    }

    /// Pops every record above the checkpoint named `id` (and, if
    /// `delete_checkpoint`, the checkpoint itself), returning the
    /// concatenated operations of all transactions popped, plus the
    /// checkpoint's stored marker snapshot. `None` if a barrier lies below
    /// the checkpoint, or the checkpoint doesn't exist.
    pub fn collect_since_checkpoint(
        &mut self,
        id: u64,
        delete_checkpoint: bool,
    ) -> Option<(Vec<RecordedOp>, Option<MarkerSnapshot>)> {
        let pos = self.barrier_blocks(id)?;
        let tail: Vec<UndoRecord> = self.undo_stack.split_off(pos + 1);
        let mut ops = Vec::new();
        for rec in &tail {
            if let UndoRecord::Transaction(t) = rec {
                ops.extend(t.operations.iter().cloned());
            }
        }
        let snapshot = match &self.undo_stack[pos] {
            UndoRecord::Checkpoint(c) => c.markers_snapshot.clone(),
            _ => unreachable!("barrier_blocks only returns checkpoint positions"),
        };
        if delete_checkpoint {
            self.undo_stack.remove(pos);
        }
        Some((ops, snapshot))
    }

    /// Read-only variant of [`Self::collect_since_checkpoint`] that neither
    /// pops nor mutates anything.
    pub fn peek_since_checkpoint(&self, id: u64) -> Option<Vec<RecordedOp>> {
        let pos = self.barrier_blocks(id)?;
        let mut ops = Vec::new();
        for rec in &self.undo_stack[pos + 1..] {
            if let UndoRecord::Transaction(t) = rec {
                ops.extend(t.operations.iter().cloned());
            }
        }
        Some(ops)
    }

    /// Sets the top transaction's grouping interval and, if the timestamps
    /// are close enough, merges it into the transaction below it. Returns
    /// `true` if a merge happened.
    pub fn apply_grouping_interval(&mut self, ms: u64) -> bool {
        let len = self.undo_stack.len();
        if len < 1 || !matches!(self.undo_stack[len - 1], UndoRecord::Transaction(_)) {
            return false;
        }
        if let UndoRecord::Transaction(top) = &mut self.undo_stack[len - 1] {
            top.grouping_interval = Some(ms);
        }
        if len < 2 {
            return false;
        }
        let can_merge = match (&self.undo_stack[len - 2], &self.undo_stack[len - 1]) {
            (UndoRecord::Transaction(prev), UndoRecord::Transaction(top)) => {
                let threshold = match prev.grouping_interval {
                    Some(prev_ms) => ms.min(prev_ms),
                    None => ms,
                };
                top.timestamp.saturating_sub(prev.timestamp) < threshold
            }
            _ => false,
        };
        if can_merge {
            self.merge_top_two();
            true
        } else {
            false
        }
    }

    /// Merges the two topmost transactions if nothing but transactions sits
    /// there (no intervening checkpoint). Returns `true` if a merge
    /// happened.
    pub fn group_last_changes(&mut self) -> bool {
        let len = self.undo_stack.len();
        if len < 2 {
            return false;
        }
        if matches!(self.undo_stack[len - 1], UndoRecord::Transaction(_))
            && matches!(self.undo_stack[len - 2], UndoRecord::Transaction(_))
        {
            self.merge_top_two();
            true
        } else {
            false
        }
    }

    fn merge_top_two(&mut self) {
        let top = self.undo_stack.pop().expect("checked len >= 2");
        let top = match top {
            UndoRecord::Transaction(t) => t,
            _ => unreachable!(),
        };
        if let Some(UndoRecord::Transaction(prev)) = self.undo_stack.last_mut() {
            prev.operations.extend(top.operations);
            prev.timestamp = top.timestamp;
            prev.markers_after = top.markers_after;
            prev.grouping_interval = top.grouping_interval;
        } else {
            unreachable!("merge_top_two requires two transactions");
        }
    }

    pub fn next_checkpoint_id(&self) -> u64 {
        self.next_checkpoint_id
    }

    pub fn set_next_checkpoint_id(&mut self, id: u64) {
        self.next_checkpoint_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SpliceOperation;
    use crate::splice_id::SpliceId;

    fn txn(seq: u32, timestamp: u64) -> TransactionRecord {
        TransactionRecord {
            timestamp,
            grouping_interval: None,
            operations: vec![RecordedOp::Splice(SpliceOperation {
                splice_id: SpliceId::new(1, seq),
                deletion: None,
                insertion: None,
            })],
            markers_before: None,
            markers_after: None,
        }
    }

    #[test]
    fn undo_then_redo_round_trips_through_both_stacks() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.push_transaction(txn(2, 0));

        let popped = h.pop_for_undo().unwrap();
        assert_eq!(popped.operations.len(), 1);
        assert_eq!(h.undo_stack.len(), 1);
        assert_eq!(h.redo_stack.len(), 1);

        let redone = h.pop_for_redo().unwrap();
        assert_eq!(redone.timestamp, popped.timestamp);
        assert_eq!(h.undo_stack.len(), 2);
        assert_eq!(h.redo_stack.len(), 0);
    }

    #[test]
    fn barrier_checkpoint_blocks_undo_past_it() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.create_checkpoint(true, None);
        h.push_transaction(txn(2, 0));

        assert!(h.pop_for_undo().is_some());
        assert!(h.pop_for_undo().is_none(), "barrier must block the second undo");
    }

    #[test]
    fn non_barrier_checkpoint_does_not_block_undo() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.create_checkpoint(false, None);
        h.push_transaction(txn(2, 0));

        assert!(h.pop_for_undo().is_some());
        assert!(h.pop_for_undo().is_some(), "non-barrier checkpoints are skipped over");
    }

    #[test]
    fn group_last_changes_merges_two_topmost_transactions() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.push_transaction(txn(2, 5));

        assert!(h.group_last_changes());
        assert_eq!(h.undo_stack.len(), 1);
        let merged = h.undo_stack[0].as_transaction().unwrap();
        assert_eq!(merged.operations.len(), 2);
        assert_eq!(merged.timestamp, 5);
    }

    #[test]
    fn apply_grouping_interval_merges_within_window() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 100));
        h.push_transaction(txn(2, 150));

        assert!(h.apply_grouping_interval(100));
        assert_eq!(h.undo_stack.len(), 1);
    }

    #[test]
    fn apply_grouping_interval_does_not_merge_outside_window() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 100));
        h.push_transaction(txn(2, 500));

        assert!(!h.apply_grouping_interval(100));
        assert_eq!(h.undo_stack.len(), 2);
    }

    #[test]
    fn collect_since_checkpoint_refuses_when_a_barrier_lies_below_it() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.create_checkpoint(true, None);
        let cp = h.create_checkpoint(false, None);
        h.push_transaction(txn(2, 0));

        assert!(h.collect_since_checkpoint(cp, false).is_none());
    }

    #[test]
    fn collect_since_checkpoint_succeeds_with_no_barrier_below_it() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        let cp = h.create_checkpoint(false, None);
        h.push_transaction(txn(2, 0));
        h.push_transaction(txn(3, 0));

        let (ops, _snapshot) = h.collect_since_checkpoint(cp, false).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(h.undo_stack.len(), 2, "checkpoint kept, transactions above it popped");
    }

    #[test]
    fn collect_since_checkpoint_returns_none_for_unknown_id() {
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        assert!(h.collect_since_checkpoint(999, false).is_none());
    }

    #[test]
    fn redoing_a_transaction_carries_an_adjacent_checkpoint_back() {
        // undo_stack: [txn1, txn2, checkpoint]. Undoing both transactions
        // moves the checkpoint alongside txn2 (it sat directly above txn2),
        // landing it adjacent to txn2 on the redo stack too. Redoing in
        // reverse (txn1 first, the most recently undone) should therefore
        // carry that checkpoint back with txn1, since it is the checkpoint
        // immediately following txn1 on the *current* redo stack.
        let mut h = UndoHistory::new();
        h.push_transaction(txn(1, 0));
        h.push_transaction(txn(2, 0));
        h.create_checkpoint(false, None);

        h.pop_for_undo().unwrap(); // txn2 + checkpoint -> redo stack
        assert_eq!(h.undo_stack.len(), 1);
        assert_eq!(h.redo_stack.len(), 2);

        h.pop_for_undo().unwrap(); // txn1 -> redo stack
        assert_eq!(h.undo_stack.len(), 0);
        assert_eq!(h.redo_stack.len(), 3);

        h.pop_for_redo().unwrap(); // redoes txn1, carrying the checkpoint with it
        assert_eq!(h.undo_stack.len(), 2);
        assert_eq!(h.redo_stack.len(), 1);
        assert!(matches!(h.undo_stack.last(), Some(UndoRecord::Checkpoint(_))));

        h.pop_for_redo().unwrap(); // redoes txn2
        assert_eq!(h.undo_stack.len(), 3);
        assert_eq!(h.redo_stack.len(), 0);
    }
}
