//! Layered patch buffer performance benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use textquilt::{Point, Range, Regex, RegexOptions, TextBuffer};

fn sample_document(lines: usize) -> String {
    let mut text = String::new();
    for i in 0..lines {
        text.push_str("line ");
        text.push_str(&i.to_string());
        text.push_str(" with some content\n");
    }
    text
}

fn buffer_creation(c: &mut Criterion) {
    c.bench_function("buffer_new", |b| {
        b.iter(TextBuffer::new);
    });

    let document = sample_document(1_000);
    c.bench_function("buffer_with_text_1k_lines", |b| {
        b.iter(|| TextBuffer::with_text(black_box(&document)));
    });
}

fn buffer_edits(c: &mut Criterion) {
    let document = sample_document(1_000);

    c.bench_function("buffer_sequential_inserts", |b| {
        b.iter(|| {
            let mut buffer = TextBuffer::with_text(black_box(&document));
            for i in 0..100u32 {
                let position = Point::new(i * 7 % 1_000, 3);
                buffer.set_text_in_range(Range::new(position, position), "x");
            }
            buffer
        });
    });

    c.bench_function("buffer_edit_then_flush", |b| {
        b.iter(|| {
            let mut buffer = TextBuffer::with_text(black_box(&document));
            for i in 0..20u32 {
                let row = i * 31 % 1_000;
                buffer.set_text_in_range(
                    Range::new(Point::new(row, 0), Point::new(row, 4)),
                    "LINE",
                );
            }
            buffer.flush_changes();
            buffer
        });
    });
}

fn buffer_snapshots(c: &mut Criterion) {
    let document = sample_document(500);

    c.bench_function("buffer_snapshot_edit_drop", |b| {
        b.iter(|| {
            let mut buffer = TextBuffer::with_text(black_box(&document));
            for i in 0..10u32 {
                let snapshot = buffer.create_snapshot();
                let position = Point::new(i * 13 % 500, 0);
                buffer.set_text_in_range(Range::new(position, position), "y");
                black_box(snapshot.size());
            }
            buffer
        });
    });
}

fn buffer_reads(c: &mut Criterion) {
    let document = sample_document(1_000);
    let mut buffer = TextBuffer::with_text(&document);
    for i in 0..50u32 {
        let position = Point::new(i * 19 % 1_000, 5);
        buffer.set_text_in_range(Range::new(position, position), "edit");
    }

    c.bench_function("buffer_text_materialize", |b| {
        b.iter(|| black_box(&buffer).text());
    });

    c.bench_function("buffer_clip_position", |b| {
        b.iter(|| black_box(&buffer).clip_position(Point::new(512, 9)));
    });

    c.bench_function("buffer_line_length", |b| {
        b.iter(|| black_box(&buffer).line_length_for_row(777));
    });
}

fn buffer_search(c: &mut Criterion) {
    let document = sample_document(1_000);
    let mut buffer = TextBuffer::with_text(&document);
    for i in 0..50u32 {
        let position = Point::new(i * 19 % 1_000, 5);
        buffer.set_text_in_range(Range::new(position, position), "edit");
    }
    let regex = Regex::new("line 99[0-9] ", RegexOptions::empty()).unwrap();

    c.bench_function("buffer_search_all", |b| {
        b.iter(|| black_box(&buffer).search_all(black_box(&regex)));
    });
}

criterion_group!(
    benches,
    buffer_creation,
    buffer_edits,
    buffer_snapshots,
    buffer_reads,
    buffer_search
);
criterion_main!(benches);
