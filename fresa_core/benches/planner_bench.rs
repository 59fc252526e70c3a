//! Planner benchmark: chained add_line with full re-optimization.
//!
//! The recalculate pass runs on every queued motion, so its cost bounds
//! how fast a sender can stream short segments.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use fresa_common::consts::AXIS_COUNT;
use fresa_common::settings::Settings;
use fresa_core::planner::{BlockData, Planner};

fn bench_settings() -> Settings {
    Settings {
        step_per_mm: [200.0; AXIS_COUNT],
        max_feed_rate: [3000.0; AXIS_COUNT],
        acceleration: [400.0; AXIS_COUNT],
        ..Settings::default()
    }
}

fn line_data(from: [f32; AXIS_COUNT], to: [f32; AXIS_COUNT]) -> BlockData {
    let mut dir = [0.0; AXIS_COUNT];
    let mut dist_sqr = 0.0;
    for i in 0..AXIS_COUNT {
        dir[i] = to[i] - from[i];
        dist_sqr += dir[i] * dir[i];
    }
    BlockData {
        dir_vect: dir,
        distance: dist_sqr.sqrt(),
        feed: 40.0,
        ..BlockData::default()
    }
}

/// Stream `n` short zig-zag segments through the ring, draining as the
/// interpolator would.
fn stream_segments(n: usize, settings: &Settings) {
    let mut planner = Planner::new();
    let mut position = [0.0f32; AXIS_COUNT];
    for i in 0..n {
        if planner.is_full() {
            planner.discard_block();
        }
        let from = planner.get_position();
        position[0] += 1.0;
        position[1] += if i % 2 == 0 { 0.2 } else { -0.2 };
        planner.add_line(&position, line_data(from, position), settings);
        std::hint::black_box(planner.get_block_top_speed_sqr());
    }
    std::hint::black_box(&planner);
}

fn planner_benchmark(c: &mut Criterion) {
    let settings = bench_settings();

    let mut group = c.benchmark_group("planner_stream");
    for n in [16usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| stream_segments(n, &settings));
        });
    }
    group.finish();
}

criterion_group!(benches, planner_benchmark);
criterion_main!(benches);
