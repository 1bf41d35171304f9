//! Benchmarks for stream normalization.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chat_relay::normalize::{LineAssembler, RelayForm, StreamDialect};

fn sse_body(events: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..events {
        body.extend_from_slice(
            format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"token {i} \"}}}}]}}\n\n").as_bytes(),
        );
    }
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

fn bench_line_assembly(c: &mut Criterion) {
    let body = sse_body(10_000);

    // Typical network read sizes.
    for chunk_size in [64usize, 1024, 16 * 1024] {
        c.bench_function(&format!("assemble_10k_events_chunk_{chunk_size}"), |b| {
            b.iter(|| {
                let mut asm = LineAssembler::new();
                let mut count = 0usize;
                for chunk in body.chunks(chunk_size) {
                    count += asm.push(black_box(chunk)).map_or(0, |lines| lines.len());
                }
                black_box(count);
            })
        });
    }
}

fn bench_classify(c: &mut Criterion) {
    let line = "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"}}]}";

    c.bench_function("classify_openai_content_line", |b| {
        b.iter(|| black_box(StreamDialect::OpenAiSse.classify(black_box(line), RelayForm::Content)))
    });

    let marker = "data:{\"code\":0,\"data\":false}";
    c.bench_function("ragflow_terminal_marker", |b| {
        b.iter(|| black_box(StreamDialect::RagflowSse.is_terminal_marker(black_box(marker))))
    });
}

criterion_group!(benches, bench_line_assembly, bench_classify);
criterion_main!(benches);
