// benches/benchmarks.rs — CPU reference scan and statistics benchmarks.
//
//   cargo bench --bench benchmarks
//
// The CPU side is the validation reference, not the product, but its
// cost still matters: GPU tests diff entire grids against it.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use labelscan::label::LabelImage;
use labelscan::scan;
use labelscan::stats;

// ============================================================
// Helpers
// ============================================================

/// A label scene with a grid of rectangular components.
fn make_scene(w: usize, h: usize, cells: usize) -> LabelImage {
    let mut img = LabelImage::new(w, h);
    let cw = w / cells;
    let ch = h / cells;
    for cy in 0..cells {
        for cx in 0..cells {
            // Leave a 1-texel background gutter between components.
            img.fill_component(cx * cw, cy * ch, cw.saturating_sub(1), ch.saturating_sub(1));
        }
    }
    img
}

fn presence_seed(img: &LabelImage) -> Vec<u32> {
    let mut seed = vec![0u32; img.width() * img.height()];
    for (x, y, _) in img.texels() {
        if img.is_root(x, y) {
            seed[y * img.width() + x] = 1;
        }
    }
    seed
}

// ============================================================
// Scan benchmarks
// ============================================================

fn bench_running_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("running_sum");
    for len in [512usize, 4096, 65536] {
        let seed: Vec<u32> = (0..len).map(|i| (i % 3 == 0) as u32).collect();
        group.bench_with_input(BenchmarkId::new("passes", len), &seed, |b, seed| {
            b.iter(|| scan::running_sum(seed))
        });
        group.bench_with_input(BenchmarkId::new("sequential", len), &seed, |b, seed| {
            b.iter(|| scan::sequential_prefix(seed))
        });
    }
    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    for len in [512usize, 4096] {
        let seed: Vec<u32> = (0..len).map(|i| (i % 7 == 0) as u32).collect();
        let payload: Vec<u32> = (0..len as u32).collect();
        group.bench_function(BenchmarkId::from_parameter(len), |b| {
            b.iter(|| scan::compact(&seed, &payload))
        });
    }
    group.finish();
}

fn bench_scan_2d(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_2d");
    for (w, h) in [(128usize, 128usize), (512, 512)] {
        let img = make_scene(w, h, 8);
        let seed = presence_seed(&img);
        group.bench_function(BenchmarkId::new("separable", format!("{w}x{h}")), |b| {
            b.iter(|| scan::scan_2d(&seed, w, h))
        });
        group.bench_function(BenchmarkId::new("sequential", format!("{w}x{h}")), |b| {
            b.iter(|| scan::sequential_scan_2d(&seed, w, h))
        });
    }
    group.finish();
}

// ============================================================
// Statistics benchmarks
// ============================================================

fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");
    for cells in [4usize, 16] {
        let img = make_scene(512, 512, cells);
        group.bench_function(BenchmarkId::new("collect_512", cells * cells), |b| {
            b.iter(|| stats::collect_stats(&img))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_running_sum,
    bench_compaction,
    bench_scan_2d,
    bench_stats
);
criterion_main!(benches);
