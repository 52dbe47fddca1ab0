//! Cross-cutting convergence scenarios, kept at the top level for
//! fuzzing and cross-document properties rather than per-module unit
//! tests.

use std::collections::HashMap;

use rand::prelude::*;

use crdt_replica::{
    Document, LinearMarker, LinearRange, MarkerEntryUpdate, MarkerUpdateRequest, Operation, Point,
};

fn replicate(from: &mut Document, to: &mut Document) {
    let ops: Vec<Operation> = from
        .get_operations()
        .into_iter()
        .filter(|op| !matches!(op, Operation::MarkersUpdate(_)))
        .collect();
    to.integrate_operations(ops).unwrap();
}

fn p(row: u32, col: u32) -> Point {
    Point::new(row, col)
}

// S1. Concurrent inserts at position 0.
#[test]
fn s1_concurrent_inserts_at_same_position() {
    let mut a = Document::new(1).unwrap();
    let mut b = Document::new(2).unwrap();

    let op_a = a.set_text_in_range(Point::ZERO, Point::ZERO, "a").unwrap();
    let op_b = b.set_text_in_range(Point::ZERO, Point::ZERO, "b").unwrap();

    a.integrate_operations(vec![Operation::Splice(op_b)]).unwrap();
    b.integrate_operations(vec![Operation::Splice(op_a)]).unwrap();

    assert_eq!(a.get_text(), b.get_text());
    assert_eq!(a.get_text(), "ab");
}

// S2. Concurrent inserts inside shared text.
#[test]
fn s2_concurrent_inserts_inside_shared_text() {
    let mut a = Document::with_text(1, "ABCDEFG").unwrap();
    let mut b = Document::new(2).unwrap();
    replicate(&mut a, &mut b);

    let op_a = a.set_text_in_range(p(0, 6), p(0, 6), "+++").unwrap();
    let op_b = b.set_text_in_range(p(0, 2), p(0, 2), "***").unwrap();

    a.integrate_operations(vec![Operation::Splice(op_b)]).unwrap();
    b.integrate_operations(vec![Operation::Splice(op_a)]).unwrap();

    assert_eq!(a.get_text(), b.get_text());
    assert_eq!(a.get_text(), "AB***CDEF+++G");
}

// S3. Overlapping deletions.
#[test]
fn s3_overlapping_deletions() {
    let mut a = Document::with_text(1, "ABCDEFG").unwrap();
    let mut b = Document::new(2).unwrap();
    replicate(&mut a, &mut b);

    let op_a = a.set_text_in_range(p(0, 2), p(0, 5), "").unwrap();
    let op_b = b.set_text_in_range(p(0, 4), p(0, 6), "").unwrap();

    a.integrate_operations(vec![Operation::Splice(op_b)]).unwrap();
    b.integrate_operations(vec![Operation::Splice(op_a)]).unwrap();

    assert_eq!(a.get_text(), b.get_text());
    assert_eq!(a.get_text(), "ABG");
}

// S4. Undo of an enclosing insertion.
#[test]
fn s4_undo_of_enclosing_insertion() {
    let mut a = Document::new(1).unwrap();
    let mut b = Document::new(2).unwrap();

    let op1 = a.set_text_in_range(Point::ZERO, Point::ZERO, "ABCDEFG").unwrap();
    b.integrate_operations(vec![Operation::Splice(op1)]).unwrap();

    let op2 = a.set_text_in_range(p(0, 3), p(0, 3), "***").unwrap();
    b.integrate_operations(vec![Operation::Splice(op2)]).unwrap();
    assert_eq!(a.get_text(), "ABC***DEFG");

    let undo = a.undo().unwrap();
    assert_eq!(a.get_text(), "***");

    let undo_ops: Vec<Operation> = undo.operations.into_iter().map(Operation::Undo).collect();
    b.integrate_operations(undo_ops).unwrap();

    assert_eq!(a.get_text(), b.get_text());
    assert_eq!(b.get_text(), "***");
}

// S5. Deferred marker.
#[test]
fn s5_deferred_marker_materializes_once_dependency_arrives() {
    let mut a = Document::new(1).unwrap();
    let mut b = Document::new(2).unwrap();

    let insert_1 = a.set_text_in_range(Point::ZERO, Point::ZERO, "ABCDEFG").unwrap();
    b.integrate_operations(vec![Operation::Splice(insert_1)]).unwrap();

    // I2 lands entirely inside I1's text; anchors for the marker below live
    // inside I2.
    let insert_2 = a.set_text_in_range(p(0, 2), p(0, 2), "xyz").unwrap();
    assert_eq!(a.get_text(), "ABxyzCDEFG");

    let mut entries = HashMap::new();
    entries.insert(
        1u32,
        MarkerEntryUpdate::Set(LinearMarker::new(false, false, false, LinearRange::new(p(0, 3), p(0, 4)))),
    );
    let mut request = MarkerUpdateRequest::new();
    request.insert(1u32, Some(entries));
    let marker_op = a.update_markers(request).unwrap();

    // b receives the marker update before the splice that created the
    // anchors it references.
    b.integrate_operations(vec![Operation::MarkersUpdate(marker_op)]).unwrap();
    assert!(b.get_markers().is_empty(), "marker must stay deferred until its dependency arrives");

    b.integrate_operations(vec![Operation::Splice(insert_2)]).unwrap();

    let markers = b.get_markers();
    let marker = markers[&1][&1][&1];
    assert_eq!(marker.range.start, p(0, 3));
    assert_eq!(marker.range.end, p(0, 4));
}

// S6. Barrier checkpoint blocks undo.
#[test]
fn s6_barrier_checkpoint_blocks_undo() {
    let mut doc = Document::new(1).unwrap();
    doc.set_text_in_range(Point::ZERO, Point::ZERO, "a").unwrap();
    doc.set_text_in_range(p(0, 1), p(0, 1), "b").unwrap();
    doc.create_checkpoint(true, false);
    doc.set_text_in_range(p(0, 2), p(0, 2), "c").unwrap();

    let undo = doc.undo().unwrap();
    assert_eq!(doc.get_text(), "ab");
    assert!(!undo.text_updates.is_empty());

    assert!(doc.undo().is_none());
    assert_eq!(doc.get_text(), "ab");
}

/// Property 2: applying the emitted `TextUpdate` list (in reverse order) to
/// a naive linear buffer reproduces the replica's `get_text()`.
#[test]
fn linear_equivalence_of_emitted_text_updates() {
    let mut a = Document::with_text(1, "hello world").unwrap();
    let mut b = Document::new(2).unwrap();
    replicate(&mut a, &mut b);

    let op = a.set_text_in_range(p(0, 5), p(0, 11), ", friend").unwrap();
    let update = b.integrate_operations(vec![Operation::Splice(op)]).unwrap();

    let mut buffer: String = "hello world".to_string();
    for u in update.text_updates.iter().rev() {
        let start = point_to_byte(&buffer, u.old_start);
        let end = point_to_byte(&buffer, u.old_end);
        buffer.replace_range(start..end, &u.new_text);
    }
    assert_eq!(buffer, b.get_text());
    assert_eq!(buffer, a.get_text());
}

fn point_to_byte(text: &str, target: Point) -> usize {
    if target.is_zero() {
        return 0;
    }
    let mut row = 0u32;
    for (i, b) in text.bytes().enumerate() {
        if row == target.row && (text[..i].len() - line_start(text, i)) == target.column as usize {
            return i;
        }
        if b == b'\n' {
            row += 1;
        }
    }
    text.len()
}

fn line_start(text: &str, byte_idx: usize) -> usize {
    text[..byte_idx].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

enum Action {
    Insert { site: usize, pos: Point, text: String },
    Delete { site: usize, start: Point, len: u32 },
}

fn random_action(rng: &mut SmallRng, site: usize, doc_len: u32) -> Action {
    let alphabet: Vec<char> = "abcdefg".chars().collect();
    if doc_len == 0 || rng.gen_bool(0.6) {
        let pos = rng.gen_range(0..=doc_len);
        let ch = alphabet[rng.gen_range(0..alphabet.len())];
        Action::Insert { site, pos: Point::new(0, pos), text: ch.to_string() }
    } else {
        let pos = rng.gen_range(0..doc_len);
        let max_len = doc_len - pos;
        let len = rng.gen_range(1..=max_len.min(3));
        Action::Delete { site, start: Point::new(0, pos), len }
    }
}

/// Property 5 (order-insensitive integration): random local edits across
/// three replicas, exchanged with arbitrary ordering, converge.
#[test]
fn random_edits_across_replicas_converge() {
    let mut rng = SmallRng::seed_from_u64(42);
    let n_sites = 3;
    let mut docs: Vec<Document> = (1..=n_sites as u32).map(|id| Document::new(id).unwrap()).collect();
    let mut all_ops: Vec<Operation> = Vec::new();

    for round in 0..40 {
        let site = round % n_sites;
        let doc_len = docs[site].get_text().chars().count() as u32;
        let action = random_action(&mut rng, site, doc_len);
        let op = match action {
            Action::Insert { site, pos, text } => {
                docs[site].set_text_in_range(pos, pos, &text).unwrap()
            }
            Action::Delete { site, start, len } => {
                docs[site].set_text_in_range(start, Point::new(0, start.column + len), "").unwrap()
            }
        };
        all_ops.push(Operation::Splice(op));
    }

    // Every replica integrates the full set of operations, but in an order
    // shuffled independently per replica.
    for doc in docs.iter_mut() {
        let mut shuffled = all_ops.clone();
        shuffled.shuffle(&mut rng);
        doc.integrate_operations(shuffled).unwrap();
    }

    let reference = docs[0].get_text();
    for doc in &docs[1..] {
        assert_eq!(doc.get_text(), reference);
    }
}

/// Property 4: two consecutive undos followed by two redos restore the
/// initial state byte-for-byte.
#[test]
fn undo_redo_idempotence() {
    let mut doc = Document::new(1).unwrap();
    doc.set_text_in_range(Point::ZERO, Point::ZERO, "abc").unwrap();
    doc.set_text_in_range(p(0, 3), p(0, 3), "def").unwrap();
    let full = doc.get_text();

    doc.undo().unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.get_text(), "");

    doc.redo().unwrap();
    doc.redo().unwrap();
    assert_eq!(doc.get_text(), full);
}
