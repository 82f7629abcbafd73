//! Conversion and resampling benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fl_audio::{PcmFormat, Resampler, decode_into};

const BLOCK_FRAMES: usize = 512;

fn stereo_block(frames: usize) -> Vec<f32> {
    (0..frames * 2).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect()
}

fn bench_resampler(c: &mut Criterion) {
    let src = stereo_block(BLOCK_FRAMES * 4);
    let mut dst = vec![0.0f32; BLOCK_FRAMES * 2];
    let mut group = c.benchmark_group("resampler");

    for shrink in [1.0, 44100.0 / 48000.0, -1.0, 2.0] {
        group.bench_with_input(BenchmarkId::from_parameter(shrink), &shrink, |b, &shrink| {
            let mut resampler = Resampler::new(7);
            b.iter(|| {
                resampler.reset();
                black_box(resampler.process(black_box(&src), 2, shrink, &mut dst))
            })
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let format = PcmFormat::s16le(48000, 2);
    let raw: Vec<u8> = (0..BLOCK_FRAMES * 2).flat_map(|i| (i as i16).to_le_bytes()).collect();
    let mut out = Vec::with_capacity(BLOCK_FRAMES * 2);

    c.bench_function("decode_s16_stereo_512", |b| {
        b.iter(|| {
            decode_into(black_box(&raw), &format, false, false, 2, &mut out);
            black_box(out.len())
        })
    });
}

criterion_group!(benches, bench_resampler, bench_decode);
criterion_main!(benches);
