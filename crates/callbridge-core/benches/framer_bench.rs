//! Criterion benchmarks for the callbridge line framer.
//!
//! Measures decoding of coalesced and trickled reads, and encoding of
//! multi-line events.
//!
//! Run with:
//! ```bash
//! cargo bench --package callbridge-core --bench framer_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use callbridge_core::protocol::{decode_lines, encode_event, LineBuffer};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_batch(lines: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    for i in 0..lines {
        buf.extend_from_slice(format!("CHATMESSAGE {i} STATUS RECEIVED\r\n").as_bytes());
    }
    buf
}

fn make_event(continuations: usize) -> String {
    let mut event = String::from("CHATMESSAGE 4242 BODY first line");
    for i in 0..continuations {
        event.push('\n');
        event.push_str(&format!("continuation line number {i}"));
    }
    event
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_lines");
    for lines in [1usize, 16, 256] {
        let batch = make_batch(lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &batch, |b, batch| {
            b.iter(|| decode_lines(black_box(batch)));
        });
    }
    group.finish();
}

fn bench_line_buffer_fragmented(c: &mut Criterion) {
    let batch = make_batch(64);
    c.bench_function("line_buffer_7_byte_reads", |b| {
        b.iter(|| {
            let mut buf = LineBuffer::new();
            let mut total = 0;
            for chunk in batch.chunks(7) {
                total += buf.extend(black_box(chunk)).map(|l| l.len()).unwrap_or(0);
            }
            total
        });
    });
}

fn bench_line_buffer_trickled_long_line(c: &mut Criterion) {
    let mut line = vec![b'x'; 16 * 1024];
    line.push(b'\n');
    c.bench_function("line_buffer_16k_line_1_byte_reads", |b| {
        b.iter(|| {
            let mut buf = LineBuffer::new();
            let mut total = 0;
            for byte in line.chunks(1) {
                total += buf.extend(black_box(byte)).map(|l| l.len()).unwrap_or(0);
            }
            total
        });
    });
}

fn bench_encode_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_event");
    for continuations in [0usize, 4, 64] {
        let event = make_event(continuations);
        group.bench_with_input(
            BenchmarkId::from_parameter(continuations),
            &event,
            |b, event| {
                b.iter(|| encode_event(black_box(event)));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_line_buffer_fragmented,
    bench_line_buffer_trickled_long_line,
    bench_encode_event
);
criterion_main!(benches);
