// benches/gpu_benchmarks.rs — GPU pipeline benchmarks.
//
// Mirrors benchmarks.rs structure so CPU and GPU numbers sit side by
// side. Requires a Vulkan GPU:
//
//   cargo bench --bench gpu_benchmarks
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including the CPU overhead of each pass
// (uniform writes, bind groups, submit). The synchronous wait after each
// run is part of the measurement on purpose — a stage's `run` is defined
// as complete-on-return. Warmup matters: first iterations pay lazy
// pipeline compilation on some drivers.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use labelscan::gpu::device::GpuDevice;
use labelscan::gpu::kernel::KernelProvider;
use labelscan::gpu::slots::SlotTable;
use labelscan::gpu::stage::{ReductionStage, StatsKind, StatsStage};
use labelscan::gpu::surface::Surface;
use labelscan::label::LabelImage;

fn make_scene(w: usize, h: usize, cells: usize) -> LabelImage {
    let mut img = LabelImage::new(w, h);
    let cw = w / cells;
    let ch = h / cells;
    for cy in 0..cells {
        for cx in 0..cells {
            img.fill_component(cx * cw, cy * ch, cw.saturating_sub(1), ch.saturating_sub(1));
        }
    }
    img
}

fn bench_reduction_stage(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("gpu_benchmarks requires a Vulkan GPU");
    let provider = KernelProvider::new(&gpu);

    let mut group = c.benchmark_group("gpu_reduction");
    group.warm_up_time(Duration::from_secs(2));

    for size in [128u32, 512] {
        let img = make_scene(size as usize, size as usize, 8);
        let mut table = SlotTable::new();
        let mut label =
            Surface::create(&gpu, size, size, Some(img.as_bytes()));
        let label_slot = label.bind_as_input(&mut table).unwrap();

        let mut stage = ReductionStage::new(size, size);
        stage.init(&gpu, &provider, &mut table).unwrap();
        stage.update_inputs(label_slot);

        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                stage.run(&gpu, &table).unwrap();
                gpu.wait_idle();
            })
        });

        stage.release(&mut table).unwrap();
        label.destroy(&mut table).unwrap();
    }
    group.finish();
}

fn bench_stats_stage(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("gpu_benchmarks requires a Vulkan GPU");
    let provider = KernelProvider::new(&gpu);

    let mut group = c.benchmark_group("gpu_stats");
    group.warm_up_time(Duration::from_secs(2));

    for size in [128u32, 512] {
        let img = make_scene(size as usize, size as usize, 8);
        let mut table = SlotTable::new();
        let mut label =
            Surface::create(&gpu, size, size, Some(img.as_bytes()));
        let label_slot = label.bind_as_input(&mut table).unwrap();

        let mut counting = StatsStage::new(StatsKind::Counting, size, size);
        let mut centroiding = StatsStage::new(StatsKind::Centroiding, size, size);
        counting.init(&gpu, &provider, &mut table).unwrap();
        centroiding.init(&gpu, &provider, &mut table).unwrap();
        counting.update_inputs(label_slot);
        centroiding.update_inputs(label_slot);
        counting.set_target((0, 0));
        centroiding.set_target((0, 0));

        group.bench_function(BenchmarkId::new("count", size), |b| {
            b.iter(|| {
                counting.run(&gpu, &table).unwrap();
                gpu.wait_idle();
            })
        });
        group.bench_function(BenchmarkId::new("centroid", size), |b| {
            b.iter(|| {
                centroiding.run(&gpu, &table).unwrap();
                gpu.wait_idle();
            })
        });

        counting.release(&mut table).unwrap();
        centroiding.release(&mut table).unwrap();
        label.destroy(&mut table).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_reduction_stage, bench_stats_stage);
criterion_main!(benches);
