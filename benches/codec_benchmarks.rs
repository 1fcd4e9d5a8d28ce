//! Codec performance benchmarks
//!
//! Measures event serialization, stream chunk framing and decoding, and
//! long-poll frame handling.

#![cfg(feature = "bench")]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use vibe_rs::longpoll::{OutboundQueue, ReceiptTracker};
use vibe_rs::protocol::{
    Event, StreamDecoder, decode_event, decode_longpoll_frame, encode_event,
    encode_longpoll_frame, encode_stream_chunk,
};

fn sample_events() -> Vec<(&'static str, Event)> {
    vec![
        ("small", Event::new("1", "chat", json!("hi"))),
        (
            "medium",
            Event::new(
                "2",
                "update",
                json!({
                    "user": {"id": 42, "name": "alice"},
                    "tags": ["a", "b", "c"],
                    "text": "line one\nline two"
                }),
            )
            .expecting_reply(),
        ),
        (
            "large",
            Event::new(
                "3",
                "bulk",
                json!((0..200).map(|n| json!({"n": n, "v": format!("value-{n}")})).collect::<Vec<_>>()),
            ),
        ),
    ]
}

fn benchmark_event_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_codec");

    for (name, event) in sample_events() {
        let text = encode_event(&event).unwrap();
        group.bench_with_input(BenchmarkId::new("encode", name), &event, |b, event| {
            b.iter(|| encode_event(black_box(event)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", name), &text, |b, text| {
            b.iter(|| decode_event(black_box(text)).unwrap())
        });
    }

    group.finish();
}

fn benchmark_stream_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_framing");

    for (name, event) in sample_events() {
        let text = encode_event(&event).unwrap();
        let chunk = encode_stream_chunk(&text);

        group.bench_with_input(BenchmarkId::new("encode_chunk", name), &text, |b, text| {
            b.iter(|| encode_stream_chunk(black_box(text)))
        });

        // Feed the chunk split in two to exercise reassembly
        let (head, tail) = chunk.as_bytes().split_at(chunk.len() / 2);
        group.bench_function(BenchmarkId::new("decode_split", name), |b| {
            b.iter(|| {
                let mut decoder = StreamDecoder::new();
                let mut payloads = decoder.feed(black_box(head)).unwrap();
                payloads.extend(decoder.feed(black_box(tail)).unwrap());
                payloads
            })
        });
    }

    group.finish();
}

fn benchmark_longpoll(c: &mut Criterion) {
    let text = encode_event(&Event::new("9", "tick", json!({"n": 9}))).unwrap();
    let frame = encode_longpoll_frame(12_345, &text);

    c.bench_function("longpoll_frame_encode", |b| {
        b.iter(|| encode_longpoll_frame(black_box(12_345), black_box(&text)))
    });
    c.bench_function("longpoll_frame_decode", |b| {
        b.iter(|| decode_longpoll_frame(black_box(&frame)).unwrap())
    });

    c.bench_function("longpoll_queue_exchange_100", |b| {
        b.iter(|| {
            let mut queue = OutboundQueue::new();
            let mut tracker = ReceiptTracker::new();
            for n in 0..100 {
                queue.enqueue(format!("m{n}"));
            }
            while let Some((id, _)) = queue.head() {
                tracker.accept(id);
                queue.ack(id);
            }
            black_box(tracker.last())
        })
    });
}

criterion_group!(
    benches,
    benchmark_event_codec,
    benchmark_stream_framing,
    benchmark_longpoll
);
criterion_main!(benches);
