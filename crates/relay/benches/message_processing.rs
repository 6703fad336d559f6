//! Performance benchmarks for message processing.
//!
//! These benchmarks measure the hot paths in the relay:
//! - Parsing endpoint frames
//! - Encoding PTY output chunks into `output` messages
//! - Handing output between the reader thread and the relay task

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use protocol::{ClientMessage, DataEncoding, OutputEncoder, ServerMessage};

/// Benchmark parsing of typical endpoint frames.
fn bench_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parsing");

    // Single keystroke
    let keystroke = r#"{"type":"input","id":"0b6c1f9e-5a7d-4c1e-9f51-4a8f2d3c7e10","data":"l"}"#;
    group.bench_function("input_keystroke", |b| {
        b.iter(|| ClientMessage::from_json(black_box(keystroke)).unwrap());
    });

    // Pasted block
    let paste = ClientMessage::Input {
        id: "0b6c1f9e-5a7d-4c1e-9f51-4a8f2d3c7e10".to_string(),
        data: "x".repeat(4096),
        encoding: DataEncoding::Utf8,
    }
    .to_json()
    .unwrap();
    group.throughput(Throughput::Bytes(paste.len() as u64));
    group.bench_function("input_paste_4KB", |b| {
        b.iter(|| ClientMessage::from_json(black_box(&paste)).unwrap());
    });

    let resize =
        r#"{"type":"resize","id":"0b6c1f9e-5a7d-4c1e-9f51-4a8f2d3c7e10","cols":120,"rows":40}"#;
    group.bench_function("resize", |b| {
        b.iter(|| ClientMessage::from_json(black_box(resize)).unwrap());
    });

    group.finish();
}

/// Benchmark turning a full read buffer into a serialized `output` frame.
fn bench_output_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_encoding");

    // Typical terminal output: ASCII with escape sequences and some
    // multi-byte characters.
    let chunk: Vec<u8> = "\x1b[32mok\x1b[0m caf\u{e9} \u{2500}\u{2500} done\r\n"
        .as_bytes()
        .iter()
        .copied()
        .cycle()
        .take(4096)
        .collect();
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    for encoding in [DataEncoding::Utf8, DataEncoding::Base64] {
        let name = format!("{encoding:?}_4KB").to_lowercase();
        group.bench_function(name, |b| {
            let mut encoder = OutputEncoder::new(encoding);
            b.iter(|| {
                let data = encoder.encode(black_box(&chunk)).unwrap_or_default();
                let message = ServerMessage::Output {
                    id: "0b6c1f9e-5a7d-4c1e-9f51-4a8f2d3c7e10".to_string(),
                    data,
                    encoding,
                };
                black_box(message.to_json().unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark the bounded channel between the reader thread and relay task.
fn bench_output_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_channel");

    group.bench_function("blocking_send_recv_4KB", |b| {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(256);
        let data = vec![0u8; 4096];

        b.iter(|| {
            tx.blocking_send(black_box(data.clone())).unwrap();
            black_box(rx.blocking_recv().unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_parsing,
    bench_output_encoding,
    bench_output_channel,
);

criterion_main!(benches);
