use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use mongolog_ingest::sink::encode_body;
use mongolog_ingest::{LineOutcome, OperationParser, PipelineTags};

const COMMAND_LINE: &str = "2024-01-01T00:00:00.000+0000 I COMMAND [conn1] command test.foo command: find { find: \"foo\" } planSummary: IXSCAN keysExamined:10 docsExamined:5 numYields:0 reslen:220 locks:{...} protocol:op_query 12ms\n";
const LEGACY_LINE: &str = "2013-08-05T20:53:11.489 [conn5] query test.foo query: { a: 1 } ntoreturn:0 ntoskip:0 nscanned:10 keyUpdates:0 locks(micros) r:1234 nreturned:1 reslen:20 12ms\n";
const NOISE_LINE: &str = "2024-01-01T00:00:00.000+0000 I NETWORK [listener] connection accepted from 10.0.0.5:53012 #42 (12 connections now open)\n";

fn parser() -> OperationParser {
    OperationParser::new(PipelineTags {
        project: "bench".to_string(),
        hostname: "db1".to_string(),
    })
}

fn bench_parse_command_line(c: &mut Criterion) {
    let parser = parser();
    c.bench_function("parse_command_line", |b| {
        b.iter(|| black_box(parser.parse(black_box(COMMAND_LINE.as_bytes()))));
    });
}

fn bench_parse_legacy_line(c: &mut Criterion) {
    let parser = parser();
    c.bench_function("parse_legacy_line", |b| {
        b.iter(|| black_box(parser.parse(black_box(LEGACY_LINE.as_bytes()))));
    });
}

fn bench_skip_noise_line(c: &mut Criterion) {
    let parser = parser();
    c.bench_function("skip_noise_line", |b| {
        b.iter(|| black_box(parser.parse(black_box(NOISE_LINE.as_bytes()))));
    });
}

fn bench_mixed_log(c: &mut Criterion) {
    let parser = parser();
    let lines: Vec<&str> = [COMMAND_LINE, NOISE_LINE, LEGACY_LINE, NOISE_LINE]
        .iter()
        .cycle()
        .take(1000)
        .copied()
        .collect();
    let bytes: usize = lines.iter().map(|l| l.len()).sum();

    let mut group = c.benchmark_group("mixed_log");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("parse_1000_lines", |b| {
        b.iter(|| {
            let parsed = lines
                .iter()
                .filter(|line| matches!(parser.parse(line.as_bytes()), LineOutcome::Parsed(_)))
                .count();
            black_box(parsed)
        });
    });
    group.finish();
}

fn bench_encode_batch(c: &mut Criterion) {
    let parser = parser();
    let point = match parser.parse(COMMAND_LINE.as_bytes()) {
        LineOutcome::Parsed(point) => point,
        other => panic!("benchmark line did not parse: {:?}", other),
    };
    let batch = vec![point; 5000];
    c.bench_function("encode_batch_5000", |b| {
        b.iter(|| black_box(encode_body(black_box(&batch))));
    });
}

criterion_group!(
    benches,
    bench_parse_command_line,
    bench_parse_legacy_line,
    bench_skip_noise_line,
    bench_mixed_log,
    bench_encode_batch
);
criterion_main!(benches);
