//! Edge-case integration tests for the layered patch buffer.
//!
//! Exercises CRLF handling at patch seams, noop collapse, snapshot
//! isolation and consolidation, cross-chunk search, and the
//! serialization round trip.

use textquilt::{
    LineEnding, Point, Range, Regex, RegexOptions, Text, TextBuffer,
};

fn range(start: (u32, u32), end: (u32, u32)) -> Range {
    Range::new(Point::new(start.0, start.1), Point::new(end.0, end.1))
}

// ============================================================================
// CRLF clipping
// ============================================================================

#[test]
fn clip_never_lands_between_cr_and_lf() {
    let buffer = TextBuffer::with_text("a\r\nb");
    let clipped = buffer.clip_position(Point::new(0, 2));
    assert_eq!(clipped.position, Point::new(0, 1));
    assert_eq!(clipped.offset, 1);

    // Past-end columns clamp to the CR as well.
    let clipped = buffer.clip_position(Point::new(0, u32::MAX));
    assert_eq!(clipped.position, Point::new(0, 1));

    // The row after the CRLF starts normally.
    assert_eq!(buffer.clip_position(Point::new(1, 0)).offset, 3);
}

#[test]
fn crlf_formed_by_insertion_after_cr() {
    // The LF lives in a patch layer; the CR lives in the base. The seam
    // forms a CRLF pair and positions inside it snap onto the CR.
    let mut buffer = TextBuffer::with_text("ab\rcd");
    buffer.set_text_in_range(range((0, 3), (0, 3)), "\nZ");
    assert_eq!(buffer.text(), "ab\r\nZcd");
    let clipped = buffer.clip_position(Point::new(0, 3));
    assert_eq!(clipped.position, Point::new(0, 2));
    assert_eq!(clipped.offset, 2);
    assert_eq!(buffer.line_length_for_row(0), Some(2));
    assert_eq!(buffer.line_ending_for_row(0), Some(LineEnding::Crlf));
}

#[test]
fn crlf_formed_by_insertion_before_lf() {
    // The CR lives in a patch layer; the LF lives in the base.
    let mut buffer = TextBuffer::with_text("ab\ncd");
    buffer.set_text_in_range(range((0, 2), (0, 2)), "Z\r");
    assert_eq!(buffer.text(), "abZ\r\ncd");
    let clipped = buffer.clip_position(Point::new(0, 4));
    assert_eq!(clipped.position, Point::new(0, 3));
    assert_eq!(clipped.offset, 3);
    assert_eq!(buffer.line_length_for_row(0), Some(3));
    assert_eq!(buffer.line_ending_for_row(0), Some(LineEnding::Crlf));
}

#[test]
fn patch_spanning_crlf_keeps_lone_cr_as_content() {
    let mut buffer = TextBuffer::with_text("ab\r\ncd");
    buffer.set_text_in_range(range((0, 1), (0, 2)), "X\r");
    assert_eq!(buffer.text(), "aX\r\r\ncd");
    assert_eq!(buffer.line_length_for_row(0), Some(3));
    assert_eq!(buffer.line_length_for_row(1), Some(2));
    assert_eq!(buffer.line_ending_for_row(0), Some(LineEnding::Crlf));
    assert_eq!(buffer.line_length_for_row(2), None);
}

#[test]
fn line_endings_across_buffer() {
    let buffer = TextBuffer::with_text("lf\ncrlf\r\nnone");
    assert_eq!(buffer.line_ending_for_row(0), Some(LineEnding::Lf));
    assert_eq!(buffer.line_ending_for_row(1), Some(LineEnding::Crlf));
    assert_eq!(buffer.line_ending_for_row(2), Some(LineEnding::None));
    assert_eq!(buffer.line_ending_for_row(3), None);
    assert_eq!(buffer.line_ending_for_row(1).unwrap().as_str(), "\r\n");
}

// ============================================================================
// Noop collapse
// ============================================================================

#[test]
fn rewriting_a_range_with_itself_is_a_noop() {
    let mut buffer = TextBuffer::with_text("hello");
    buffer.set_text_in_range(range((0, 1), (0, 4)), "ell");
    assert_eq!(buffer.text(), "hello");
    assert_eq!(buffer.layer_count(), 1);
    assert!(!buffer.is_modified());
}

#[test]
fn noop_rewrite_spanning_existing_changes() {
    let mut buffer = TextBuffer::with_text("abcdef");
    buffer.set_text_in_range(range((0, 2), (0, 4)), "CD");
    assert_eq!(buffer.text(), "abCDef");
    let layer_count = buffer.layer_count();

    // Rewrite the already patched region with its current content.
    buffer.set_text_in_range(range((0, 1), (0, 5)), "bCDe");
    assert_eq!(buffer.text(), "abCDef");
    assert_eq!(buffer.layer_count(), layer_count);
    assert!(buffer.is_modified());
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_reads_creation_state_forever() {
    let mut buffer = TextBuffer::with_text("abc");
    let snapshot = buffer.create_snapshot();
    buffer.set_text_in_range(range((0, 1), (0, 2)), "XYZ");
    assert_eq!(buffer.text(), "aXYZc");
    assert_eq!(snapshot.text(), "abc");

    // Reads through the snapshot stay stable across further edits and
    // flushes of preceding state.
    buffer.set_text_in_range(range((0, 0), (0, 1)), "");
    assert_eq!(buffer.text(), "XYZc");
    assert_eq!(snapshot.text(), "abc");
    assert_eq!(snapshot.text_in_range(range((0, 1), (0, 3))), "bc");
    assert_eq!(snapshot.line_length_for_row(0), Some(3));
}

#[test]
fn multiple_snapshots_pin_distinct_layers() {
    let mut buffer = TextBuffer::with_text("v0");
    let first = buffer.create_snapshot();
    buffer.set_text_in_range(range((0, 1), (0, 2)), "1");
    let second = buffer.create_snapshot();
    buffer.set_text_in_range(range((0, 1), (0, 2)), "2");

    assert_eq!(buffer.text(), "v2");
    assert_eq!(first.text(), "v0");
    assert_eq!(second.text(), "v1");

    drop(first);
    assert_eq!(second.text(), "v1");
    drop(second);

    buffer.flush_changes();
    assert_eq!(buffer.layer_count(), 1);
    assert_eq!(buffer.text(), "v2");
}

#[test]
fn snapshot_search_sees_old_content() {
    let mut buffer = TextBuffer::with_text("needle in haystack");
    let snapshot = buffer.create_snapshot();
    buffer.set_text_in_range(range((0, 0), (0, 6)), "pin");

    let regex = Regex::new("needle", RegexOptions::empty()).unwrap();
    assert_eq!(buffer.search(&regex), None);
    assert_eq!(snapshot.search(&regex), Some(range((0, 0), (0, 6))));
}

#[test]
fn snapshot_outliving_buffer_still_reads() {
    let snapshot = {
        let mut buffer = TextBuffer::with_text("persist");
        let snapshot = buffer.create_snapshot();
        buffer.set_text_in_range(range((0, 0), (0, 0)), "x");
        snapshot
    };
    assert_eq!(snapshot.text(), "persist");
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn search_spans_three_chunks() {
    let mut buffer = TextBuffer::with_text("foofoo");
    buffer.set_text_in_range(range((0, 3), (0, 3)), "bar");
    assert_eq!(buffer.text(), "foobarfoo");
    assert!(buffer.chunks().len() >= 3);

    let regex = Regex::new("ob.*rf", RegexOptions::empty()).unwrap();
    assert_eq!(buffer.search(&regex), Some(range((0, 2), (0, 7))));
}

#[test]
fn search_match_ending_in_cr_before_lf_chunk() {
    // The match's CR and the following LF land in different chunks; the
    // reported range must not end inside the CRLF pair.
    let mut buffer = TextBuffer::with_text("one\ntwo");
    buffer.set_text_in_range(range((0, 3), (0, 3)), "\r");
    assert_eq!(buffer.text(), "one\r\ntwo");

    let regex = Regex::new("one.", RegexOptions::empty()).unwrap();
    assert_eq!(buffer.search(&regex), Some(range((0, 0), (0, 3))));
}

#[test]
fn search_all_finds_matches_in_every_chunk() {
    let mut buffer = TextBuffer::with_text("x1x\nx2x");
    buffer.set_text_in_range(range((0, 1), (0, 2)), "9");
    buffer.set_text_in_range(range((1, 1), (1, 2)), "8");
    assert_eq!(buffer.text(), "x9x\nx8x");

    let regex = Regex::new("x", RegexOptions::empty()).unwrap();
    assert_eq!(
        buffer.search_all(&regex),
        vec![
            range((0, 0), (0, 1)),
            range((0, 2), (0, 3)),
            range((1, 0), (1, 1)),
            range((1, 2), (1, 3)),
        ]
    );
}

#[test]
fn search_in_subrange_clips_and_bounds() {
    let buffer = TextBuffer::with_text("cat cat cat");
    let regex = Regex::new("cat", RegexOptions::empty()).unwrap();
    assert_eq!(
        buffer.search_in_range(&regex, range((0, 2), (0, 99))),
        Some(range((0, 4), (0, 7)))
    );
    assert_eq!(
        buffer.search_all_in_range(&regex, range((0, 4), (0, 11))).len(),
        2
    );
}

#[test]
fn empty_matching_regex_reports_origin_probe() {
    // The final empty-input probe reports the empty range at the origin,
    // also for non-empty buffers.
    let buffer = TextBuffer::with_text("abc");
    let regex = Regex::new("q*", RegexOptions::empty()).unwrap();
    let matches = buffer.search_all(&regex);
    assert!(matches.contains(&range((0, 0), (0, 0))));
}

#[test]
fn scan_callback_can_stop_early() {
    let buffer = TextBuffer::with_text("a a a a");
    let regex = Regex::new("a", RegexOptions::empty()).unwrap();
    let mut seen = Vec::new();
    buffer.scan_in_range(&regex, range((0, 0), (0, 7)), |found| {
        seen.push(found);
        seen.len() == 2
    });
    assert_eq!(seen.len(), 2);
}

#[test]
fn multiline_search_through_patches() {
    let mut buffer = TextBuffer::with_text("alpha\nbeta\ngamma");
    buffer.set_text_in_range(range((1, 0), (1, 4)), "delta");
    let regex = Regex::new("^delta$", RegexOptions::MULTILINE).unwrap();
    assert_eq!(buffer.search(&regex), Some(range((1, 0), (1, 5))));
}

// ============================================================================
// Squash correctness
// ============================================================================

#[test]
fn five_overlapping_edits_then_flush_match_naive_model() {
    let edits: &[((u32, u32), (u32, u32), &str)] = &[
        ((0, 4), (0, 9), "brown"),
        ((0, 0), (0, 3), "a"),
        ((0, 2), (0, 7), "quick\nfox"),
        ((1, 1), (1, 3), ""),
        ((0, 3), (1, 0), "-"),
    ];

    let mut buffer = TextBuffer::with_text("the speedy dog");
    let mut model = String::from("the speedy dog");
    for &(start, end, replacement) in edits {
        let clipped_start = buffer.clip_position(Point::new(start.0, start.1));
        let clipped_end = buffer.clip_position(Point::new(end.0, end.1));
        buffer.set_text_in_range(range(start, end), replacement);

        let units: Vec<u16> = model.encode_utf16().collect();
        let mut next = Vec::new();
        next.extend_from_slice(&units[..clipped_start.offset as usize]);
        next.extend(replacement.encode_utf16());
        next.extend_from_slice(&units[clipped_end.offset as usize..]);
        model = String::from_utf16(&next).unwrap();
        assert_eq!(buffer.text(), model);
    }

    buffer.flush_changes();
    assert_eq!(buffer.text(), model);
    assert_eq!(buffer.layer_count(), 1);
    assert!(!buffer.is_modified());
}

#[test]
fn interleaved_snapshots_and_edits_squash_to_one_layer() {
    let mut buffer = TextBuffer::with_text("0");
    let mut snapshots = Vec::new();
    for i in 1..=5 {
        snapshots.push(buffer.create_snapshot());
        let end = buffer.extent();
        buffer.set_text_in_range(Range::new(end, end), &i.to_string());
    }
    assert_eq!(buffer.text(), "012345");
    assert!(buffer.layer_count() > 1);

    // Release pins out of order; consolidation runs as counts hit zero.
    snapshots.swap(0, 4);
    snapshots.swap(1, 3);
    for snapshot in snapshots {
        drop(snapshot);
    }
    buffer.flush_changes();
    assert_eq!(buffer.layer_count(), 1);
    assert_eq!(buffer.text(), "012345");
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn chunk_concatenation_reproduces_text() {
    let mut buffer = TextBuffer::with_text("alpha\nbeta\ngamma");
    buffer.set_text_in_range(range((0, 5), (1, 0)), "\r\n");
    buffer.set_text_in_range(range((2, 0), (2, 5)), "GAMMA");
    assert_eq!(buffer.chunks().concat(), buffer.text());
}

#[test]
fn adjacent_ranges_concatenate() {
    let mut buffer = TextBuffer::with_text("one two three");
    buffer.set_text_in_range(range((0, 4), (0, 7)), "2\n2");
    let middle = Point::new(1, 1);
    let left = buffer.text_in_range(Range::new(Point::ZERO, middle));
    let right = buffer.text_in_range(Range::new(middle, buffer.extent()));
    assert_eq!(format!("{left}{right}"), buffer.text());
}

#[test]
fn serialized_changes_round_trip() {
    let mut buffer = TextBuffer::with_text("line one\nline two\nline three");
    buffer.set_text_in_range(range((0, 5), (0, 8)), "1");
    buffer.set_text_in_range(range((1, 5), (1, 8)), "2\r\nextra");
    buffer.set_text_in_range(range((0, 0), (0, 0)), ">");
    let bytes = buffer.serialize_changes();

    let mut restored = TextBuffer::with_text("line one\nline two\nline three");
    restored.deserialize_changes(&bytes).unwrap();
    assert_eq!(restored.text(), buffer.text());
    assert_eq!(restored.extent(), buffer.extent());
    assert_eq!(restored.size(), buffer.size());
    assert_eq!(restored.layer_count(), 2);
}

#[test]
fn serialize_after_flush_is_pristine() {
    let mut buffer = TextBuffer::with_text("abc");
    buffer.set_text_in_range(range((0, 0), (0, 0)), "x");
    buffer.flush_changes();
    let bytes = buffer.serialize_changes();

    let mut other = TextBuffer::with_text("xabc");
    other.deserialize_changes(&bytes).unwrap();
    assert_eq!(other.text(), "xabc");
}

// ============================================================================
// Reset and inverted changes
// ============================================================================

#[test]
fn reset_with_live_snapshot_preserves_snapshot() {
    let mut buffer = TextBuffer::with_text("before");
    let snapshot = buffer.create_snapshot();
    buffer.reset(Text::from("after"));
    assert_eq!(buffer.text(), "after");
    assert_eq!(snapshot.text(), "before");
    drop(snapshot);
    buffer.flush_changes();
    assert_eq!(buffer.layer_count(), 1);
    assert_eq!(buffer.text(), "after");
}

#[test]
fn inverted_changes_restore_snapshot_content() {
    let mut buffer = TextBuffer::with_text("the cat sat");
    let snapshot = buffer.create_snapshot();
    buffer.set_text_in_range(range((0, 4), (0, 7)), "dog");
    buffer.set_text_in_range(range((0, 8), (0, 11)), "ran");
    assert_eq!(buffer.text(), "the dog ran");

    // Applying each inverted change to the current text restores the
    // snapshot's content.
    let inverted = buffer.get_inverted_changes(&snapshot);
    let mut text = Text::from(buffer.text().as_str());
    for change in inverted.get_changes().iter().rev() {
        text.splice(
            change.old_start,
            change.old_end.traversal(change.old_start),
            &change.new_text,
        );
    }
    assert_eq!(text.to_string_lossy(), snapshot.text());
}
