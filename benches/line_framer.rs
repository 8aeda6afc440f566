//! Benchmark for stdout line framing.
//!
//! Measures how the framer copes with worker output delivered in pipe-sized
//! chunks versus tiny fragments that split lines mid-token.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use stockbridge::bus::LineFramer;

/// Generate `num_lines` JSON lines resembling STOCKS answers.
fn generate_output(num_lines: usize) -> Vec<u8> {
    let mut out = String::with_capacity(num_lines * 96);
    for i in 0..num_lines {
        out.push_str(&format!(
            "[{{\"name\":\"SYM{}\",\"buyPrice\":{}.25,\"currentPrice\":{}.50,\"quantity\":{}}}]\n",
            i,
            100 + i,
            101 + i,
            i % 50 + 1
        ));
    }
    out.into_bytes()
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_framer");

    for num_lines in [10, 100, 1000] {
        let output = generate_output(num_lines);
        group.throughput(Throughput::Bytes(output.len() as u64));

        for chunk_size in [7, 512, 8192] {
            group.bench_with_input(
                BenchmarkId::new(format!("chunk_{}", chunk_size), num_lines),
                &output,
                |b, output| {
                    b.iter(|| {
                        let mut framer = LineFramer::new();
                        let mut lines = 0;
                        for chunk in output.chunks(chunk_size) {
                            lines += framer.feed(black_box(chunk)).len();
                        }
                        assert_eq!(lines, num_lines);
                        lines
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_framing);
criterion_main!(benches);
