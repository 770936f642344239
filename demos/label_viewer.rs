// demos/label_viewer.rs
//
// Windowed visualization of the full pipeline: synthesize a label scene,
// run the GPU reduction + statistics stages, and overlay the computed
// centroids on the colored components. The CPU reference statistics are
// printed next to the GPU results for eyeball validation.
//
// Usage:
//   cargo run --example label_viewer --release
//   cargo run --example label_viewer --release -- 320 240
//
// Controls:
//   Space  — regenerate the scene and re-run the pipeline
//   Q/Esc  — quit

use labelscan::gpu::device::GpuDevice;
use labelscan::gpu::kernel::KernelProvider;
use labelscan::gpu::slots::SlotTable;
use labelscan::gpu::stage::{
    ReductionStage, StatsKind, StatsStage, CHANNEL_COUNT, CHANNEL_SUM_X, CHANNEL_SUM_Y,
};
use labelscan::gpu::surface::Surface;
use labelscan::label::LabelImage;
use labelscan::stats;

use minifb::{Key, Window, WindowOptions};
use std::env;

/// A centroid with its component's pixel count, as read from the GPU.
struct Measured {
    count: u32,
    cx: f32,
    cy: f32,
}

fn make_scene(w: usize, h: usize, salt: usize) -> LabelImage {
    let mut img = LabelImage::new(w, h);
    // A handful of non-overlapping rectangles, jittered by the salt.
    for i in 0..6usize {
        let x0 = (i * w / 6 + (salt * 7 + i * 3) % (w / 8)) % (w - 8);
        let y0 = ((i % 3) * h / 3 + (salt * 11 + i * 5) % (h / 8)) % (h - 8);
        let rw = 8 + (salt + i * 13) % (w / 6);
        let rh = 8 + (salt * 3 + i * 17) % (h / 6);
        img.fill_component(x0, y0, rw, rh);
    }
    img
}

fn run_pipeline(
    gpu: &GpuDevice,
    provider: &KernelProvider,
    img: &LabelImage,
) -> Vec<Measured> {
    let (w, h) = (img.width() as u32, img.height() as u32);
    let mut table = SlotTable::new();

    let mut label = Surface::create(gpu, w, h, Some(img.as_bytes()));
    let label_slot = label.bind_as_input(&mut table).expect("label slot");

    let mut reduction = ReductionStage::new(w, h);
    let mut counting = StatsStage::new(StatsKind::Counting, w, h);
    let mut centroiding = StatsStage::new(StatsKind::Centroiding, w, h);
    reduction.init(gpu, provider, &mut table).expect("reduction init");
    counting.init(gpu, provider, &mut table).expect("counting init");
    centroiding.init(gpu, provider, &mut table).expect("centroiding init");
    reduction.update_inputs(label_slot);
    counting.update_inputs(label_slot);
    centroiding.update_inputs(label_slot);

    let elapsed = reduction.run(gpu, &table).expect("reduction run");
    let n = reduction.read_label_count(gpu).unwrap_or(0);
    eprintln!("[label_viewer] presence reduction: {n} labels in {elapsed:?}");

    // Measure every component the CPU reference sees; the GPU reduction
    // count is cross-checked against it below.
    let reference = stats::collect_stats(img);
    assert_eq!(n, reference.len() as u32, "GPU/CPU label count disagree");

    let mut measured = Vec::new();
    for s in &reference {
        counting.set_target(s.label);
        centroiding.set_target(s.label);
        counting.run(gpu, &table).expect("counting run");
        centroiding.run(gpu, &table).expect("centroiding run");

        let count = counting.read_channel(gpu, CHANNEL_COUNT).unwrap_or(0);
        let sum_x = centroiding.read_channel(gpu, CHANNEL_SUM_X).unwrap_or(0);
        let sum_y = centroiding.read_channel(gpu, CHANNEL_SUM_Y).unwrap_or(0);
        let (cx, cy) = if count > 0 {
            (sum_x as f32 / count as f32, sum_y as f32 / count as f32)
        } else {
            (0.0, 0.0)
        };

        eprintln!(
            "[label_viewer] label {:?}: gpu count={count} centroid=({cx:.1},{cy:.1})  \
             cpu count={} centroid=({:.1},{:.1})",
            s.label, s.count, s.cx, s.cy,
        );
        measured.push(Measured { count, cx, cy });
    }

    reduction.release(&mut table).expect("reduction release");
    counting.release(&mut table).expect("counting release");
    centroiding.release(&mut table).expect("centroiding release");
    label.destroy(&mut table).expect("label destroy");
    measured
}

/// Deterministic bright color per label.
fn label_color(label: (u16, u16)) -> u32 {
    let seed = (label.0 as u32).wrapping_mul(0x9e37) ^ (label.1 as u32).wrapping_mul(0x79b9);
    let r = 96 + (seed & 0x7f);
    let g = 96 + ((seed >> 7) & 0x7f);
    let b = 96 + ((seed >> 14) & 0x7f);
    (r << 16) | (g << 8) | b
}

fn render(img: &LabelImage, measured: &[Measured], framebuffer: &mut [u32]) {
    let w = img.width();
    for (x, y, _) in img.texels() {
        framebuffer[y * w + x] = match img.label_at(x, y) {
            Some(label) => label_color(label),
            None => 0x101014,
        };
    }
    // Centroid crosses.
    for m in measured {
        if m.count == 0 {
            continue;
        }
        let cx = m.cx.round() as i32;
        let cy = m.cy.round() as i32;
        for d in -3i32..=3 {
            for (px, py) in [(cx + d, cy), (cx, cy + d)] {
                if px >= 0 && py >= 0 && (px as usize) < w && (py as usize) < img.height() {
                    framebuffer[py as usize * w + px as usize] = 0xffffff;
                }
            }
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let w: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(256);
    let h: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(192);

    let gpu = GpuDevice::new().expect("label_viewer requires a Vulkan GPU");
    eprintln!("[label_viewer] {gpu}");
    let provider = KernelProvider::new(&gpu);

    let mut salt = 0usize;
    let mut img = make_scene(w, h, salt);
    let mut measured = run_pipeline(&gpu, &provider, &img);

    let scale = (768 / w).max(1).min(4);
    let mut window = Window::new(
        "labelscan — per-label statistics",
        w * scale,
        h * scale,
        WindowOptions::default(),
    )
    .expect("window creation failed");
    window.set_target_fps(30);

    let mut framebuffer = vec![0u32; w * h];
    let mut scaled = vec![0u32; w * scale * h * scale];

    while window.is_open() && !window.is_key_down(Key::Escape) && !window.is_key_down(Key::Q) {
        if window.is_key_pressed(Key::Space, minifb::KeyRepeat::No) {
            salt += 1;
            img = make_scene(w, h, salt);
            measured = run_pipeline(&gpu, &provider, &img);
        }

        render(&img, &measured, &mut framebuffer);
        for y in 0..h * scale {
            for x in 0..w * scale {
                scaled[y * w * scale + x] = framebuffer[(y / scale) * w + x / scale];
            }
        }
        window
            .update_with_buffer(&scaled, w * scale, h * scale)
            .expect("framebuffer update failed");
    }
}
