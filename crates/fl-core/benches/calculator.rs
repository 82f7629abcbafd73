//! Frame position calculator benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fl_core::{FrameBounds, FramePositionCalculator, LoopMode, Ticks};

fn bench_pingpong_steps(c: &mut Criterion) {
    let calc = FramePositionCalculator::default();
    let bounds = FrameBounds::whole_clip(2500);
    let step = Ticks::for_frames(3, 25.0);

    c.bench_function("calculator_pingpong_1024", |b| {
        b.iter(|| {
            let mut frame = 1;
            let mut tick = Ticks::ZERO;
            let mut fps = 25.0;
            for _ in 0..1024 {
                let next = calc.compute(frame, tick, tick + step, fps, &bounds, LoopMode::PingPong);
                if next.direction_flipped {
                    fps = -fps;
                }
                frame = next.frame;
                tick = next.tick;
            }
            black_box(frame)
        })
    });
}

fn bench_forward_wrap(c: &mut Criterion) {
    let calc = FramePositionCalculator::default();
    let bounds = FrameBounds::new(100, 160).unwrap_or(FrameBounds::whole_clip(160));

    c.bench_function("calculator_forward_wrap", |b| {
        b.iter(|| {
            calc.compute(
                black_box(150),
                Ticks::ZERO,
                Ticks::from_seconds(black_box(1.7)),
                30.0,
                &bounds,
                LoopMode::Forward,
            )
        })
    });
}

criterion_group!(benches, bench_pingpong_steps, bench_forward_wrap);
criterion_main!(benches);
