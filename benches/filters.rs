use std::sync::Arc;

use chunk_transcode::filter::run_chunked;
use chunk_transcode::{
    Encoding, EncodingFilter, EncodingRsCapability, LineEnding, LineEndingFilter, Locale, Settings,
    SourceEncoding,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn settings() -> Arc<Settings> {
    Arc::new(Settings::new(Locale::safe_default()))
}

fn encoding_filter(to: Encoding, from: SourceEncoding) -> EncodingFilter {
    EncodingFilter::with_services(to, from, Arc::new(EncodingRsCapability::new()), settings())
        .unwrap()
}

fn sample_text() -> String {
    "ソソソソん 表示能力 ｱｲｳ abc 0123\r\n".repeat(2048)
}

fn bench_cp932_to_utf8(c: &mut Criterion) {
    let cp932 = run_chunked(
        &mut encoding_filter(Encoding::Cp932, SourceEncoding::Named(Encoding::Utf8)),
        sample_text().as_bytes(),
        usize::MAX,
    )
    .unwrap();

    let mut group = c.benchmark_group("cp932_to_utf8");
    group.throughput(Throughput::Bytes(cp932.len() as u64));
    for chunk_size in [7usize, 512, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut filter =
                    encoding_filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932));
                black_box(run_chunked(&mut filter, black_box(&cp932), size).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_utf8_to_cp932(c: &mut Criterion) {
    let text = sample_text();
    let mut group = c.benchmark_group("utf8_to_cp932");
    group.throughput(Throughput::Bytes(text.len() as u64));
    for chunk_size in [7usize, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut filter =
                    encoding_filter(Encoding::Cp932, SourceEncoding::Named(Encoding::Utf8));
                black_box(run_chunked(&mut filter, black_box(text.as_bytes()), size).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_default_detection(c: &mut Criterion) {
    let text = sample_text();
    c.bench_function("detect_default_order_8k", |b| {
        b.iter(|| {
            let mut filter = encoding_filter(Encoding::Cp932, SourceEncoding::Default);
            black_box(run_chunked(&mut filter, black_box(text.as_bytes()), 8192).unwrap())
        })
    });
}

fn bench_line_endings(c: &mut Criterion) {
    let lines: Vec<Vec<u8>> = sample_text()
        .split_inclusive('\n')
        .map(|line| line.as_bytes().to_vec())
        .collect();
    let filter = LineEndingFilter::new(LineEnding::Lf, LineEnding::All).unwrap();
    c.bench_function("crlf_to_lf_per_line", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(filter.normalize(black_box(line)));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_cp932_to_utf8,
    bench_utf8_to_cp932,
    bench_default_detection,
    bench_line_endings
);
criterion_main!(benches);
