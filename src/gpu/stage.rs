// gpu/stage.rs — stage lifecycle and the closed stage set.
//
// A stage is one phase of the pipeline: it loads its kernels, allocates
// its stage-local surfaces, drives a fixed dispatch sequence, and frees
// everything on release. All stages share the lifecycle
//
//   Uninitialized → Initialized → Running (re-entrant) → Released
//
// where a failed `init` leaves the stage Uninitialized (so `release` is
// a no-op on it) and Released is terminal. `run` returns the wall-clock
// duration of its dispatch sequence — instrumentation only, never a
// control input.
//
// The stage set is closed and known at design time, so it is a tagged
// enum dispatched through one interface rather than an open subclass
// hierarchy:
//
//   Reduction    — presence scan over root pixels; yields the label
//                  count and the compacted root positions.
//   Counting     — pixel count of one component, stored to the
//                  statistics surface at channel offset 0.
//   Centroiding  — coordinate sums of one component, stored at channel
//                  offsets 1 (x) and 2 (y). Divide by the count for the
//                  centroid.
//
// The statistics stages select their component through `u_factor` (the
// target root coordinate, set via `set_target`) and pack multiple scalar
// results into one surface by re-running the same dispatch sequence
// with different `u_savingOffset` values.
//
// Stages do not own the label input: callers bind the label surface to a
// slot and hand the slot index to `update_inputs`, refreshing it between
// frames as needed.

use std::fmt;
use std::time::{Duration, Instant};

use crate::gpu::device::GpuDevice;
use crate::gpu::kernel::{
    DispatchError, KernelError, KernelHandle, KernelProvider, UniformValue, MODE_STORE,
};
use crate::gpu::reduce::{EngineError, ReductionEngine, ScanKind};
use crate::gpu::slots::{Slot, SlotError, SlotTable};
use crate::gpu::surface::{RenderTarget, Surface, TargetError};

/// Statistics surface layout: one texel per packed scalar, one row.
pub const STATS_WIDTH: u32 = 4;
/// Channel offset of the pixel count (counting stage).
pub const CHANNEL_COUNT: i32 = 0;
/// Channel offset of the x-coordinate sum (centroiding stage).
pub const CHANNEL_SUM_X: i32 = 1;
/// Channel offset of the y-coordinate sum (centroiding stage).
pub const CHANNEL_SUM_Y: i32 = 2;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Running,
    Released,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StageError {
    /// Kernel source missing or failed to link; the stage stays
    /// Uninitialized.
    KernelLoad(KernelError),
    /// Slot/target/dispatch failure from the engine underneath.
    Engine(EngineError),
    /// `run` on a stage that is not Initialized/Running.
    NotInitialized,
    /// `run` before any label input was bound via `update_inputs`.
    MissingInput,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::KernelLoad(e) => write!(f, "{e}"),
            StageError::Engine(e) => write!(f, "{e}"),
            StageError::NotInitialized => write!(f, "stage is not initialized"),
            StageError::MissingInput => write!(f, "no label input bound"),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StageError::KernelLoad(e) => Some(e),
            StageError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KernelError> for StageError {
    fn from(e: KernelError) -> Self {
        StageError::KernelLoad(e)
    }
}

impl From<EngineError> for StageError {
    fn from(e: EngineError) -> Self {
        StageError::Engine(e)
    }
}

impl From<SlotError> for StageError {
    fn from(e: SlotError) -> Self {
        StageError::Engine(EngineError::Slots(e))
    }
}

impl From<DispatchError> for StageError {
    fn from(e: DispatchError) -> Self {
        StageError::Engine(EngineError::Dispatch(e))
    }
}

impl From<TargetError> for StageError {
    fn from(e: TargetError) -> Self {
        StageError::Engine(EngineError::Target(e))
    }
}

// ---------------------------------------------------------------------------
// ReductionStage
// ---------------------------------------------------------------------------

/// Presence reduction: seeds 1 at every root pixel and scans. After
/// `run`, the result surface's far corner holds the label count (lo
/// channel) and each line texel's hi channel holds compacted root
/// positions.
pub struct ReductionStage {
    width: u32,
    height: u32,
    state: Lifecycle,
    kernel: Option<KernelHandle>,
    engine: Option<ReductionEngine>,
    root: Option<Surface>,
    label_slot: Option<Slot>,
}

impl ReductionStage {
    pub fn new(width: u32, height: u32) -> Self {
        ReductionStage {
            width,
            height,
            state: Lifecycle::Uninitialized,
            kernel: None,
            engine: None,
            root: None,
            label_slot: None,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Load the reduction kernel and allocate the stage's surfaces.
    /// On failure everything acquired so far is returned to the pool and
    /// the stage stays Uninitialized.
    pub fn init(
        &mut self,
        gpu: &GpuDevice,
        provider: &KernelProvider,
        table: &mut SlotTable,
    ) -> Result<(), StageError> {
        let kernel = provider.load(gpu, "reduction")?;

        let mut root = Surface::create(gpu, self.width, self.height, None);
        root.bind_as_input(table)?;

        let engine = match ReductionEngine::new(gpu, table, self.width, self.height) {
            Ok(engine) => engine,
            Err(e) => {
                let _ = root.unbind(table);
                return Err(e.into());
            }
        };

        self.kernel = Some(kernel);
        self.engine = Some(engine);
        self.root = Some(root);
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    /// Bind the external label surface's slot. The stage borrows the
    /// slot; the caller keeps owning the surface.
    pub fn update_inputs(&mut self, label_slot: Slot) {
        self.label_slot = Some(label_slot);
    }

    /// The state gate shared by every dispatching operation: only an
    /// Initialized or Running stage may dispatch.
    fn ensure_runnable(&self) -> Result<(), StageError> {
        match self.state {
            Lifecycle::Initialized | Lifecycle::Running => Ok(()),
            _ => Err(StageError::NotInitialized),
        }
    }

    /// Execute the presence scan. Re-entrant: each run re-seeds from the
    /// current label input.
    pub fn run(&mut self, gpu: &GpuDevice, table: &SlotTable) -> Result<Duration, StageError> {
        self.ensure_runnable()?;
        let label_slot = self.label_slot.ok_or(StageError::MissingInput)?;

        let start = Instant::now();
        let kernel = self.kernel.as_mut().ok_or(StageError::NotInitialized)?;
        let engine = self.engine.as_mut().ok_or(StageError::NotInitialized)?;
        let root = self.root.as_mut().ok_or(StageError::NotInitialized)?;

        engine.run(gpu, kernel, table, label_slot, root, ScanKind::Compaction)?;

        self.state = Lifecycle::Running;
        Ok(start.elapsed())
    }

    /// The scan result, once `run` has executed.
    pub fn result(&self) -> Option<&Surface> {
        self.root.as_ref()
    }

    /// Convenience readback of the label count: the lo channel of the
    /// result's far corner texel. Synchronous — tests and demos only.
    pub fn read_label_count(&self, gpu: &GpuDevice) -> Option<u32> {
        let root = self.root.as_ref()?;
        let values = root.readback_values(gpu);
        values.last().map(|v| v & 0xffff)
    }

    /// Free the stage's slots and surfaces. No-op unless initialized.
    pub fn release(&mut self, table: &mut SlotTable) -> Result<(), StageError> {
        if !matches!(self.state, Lifecycle::Initialized | Lifecycle::Running) {
            return Ok(());
        }
        if let Some(engine) = self.engine.take() {
            engine.release(table)?;
        }
        if let Some(root) = self.root.take() {
            root.destroy(table)?;
        }
        self.kernel = None;
        self.label_slot = None;
        self.state = Lifecycle::Released;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StatsStage (counting / centroiding)
// ---------------------------------------------------------------------------

/// Which statistic a StatsStage computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsKind {
    Counting,
    Centroiding,
}

impl StatsKind {
    fn kernel_name(self) -> &'static str {
        match self {
            StatsKind::Counting => "count",
            StatsKind::Centroiding => "centroid",
        }
    }

    /// Centroid scans spend the cursor field on 32-bit sums, so they run
    /// the running-sum halves only.
    fn scan_kind(self) -> ScanKind {
        match self {
            StatsKind::Counting => ScanKind::Compaction,
            StatsKind::Centroiding => ScanKind::SumOnly,
        }
    }
}

/// One scalar reduction per `run_packed` invocation: fill the component
/// mask, scan it, store the grid total into the statistics surface at a
/// channel offset.
pub struct StatsStage {
    kind: StatsKind,
    width: u32,
    height: u32,
    state: Lifecycle,
    fill_kernel: Option<KernelHandle>,
    stats_kernel: Option<KernelHandle>,
    engine: Option<ReductionEngine>,
    fill: Option<Surface>,
    root: Option<Surface>,
    stats: Option<Surface>,
    fill_target: RenderTarget,
    stats_target: RenderTarget,
    label_slot: Option<Slot>,
    target_label: Option<(u16, u16)>,
}

impl StatsStage {
    pub fn new(kind: StatsKind, width: u32, height: u32) -> Self {
        StatsStage {
            kind,
            width,
            height,
            state: Lifecycle::Uninitialized,
            fill_kernel: None,
            stats_kernel: None,
            engine: None,
            fill: None,
            root: None,
            stats: None,
            fill_target: RenderTarget::new(),
            stats_target: RenderTarget::new(),
            label_slot: None,
            target_label: None,
        }
    }

    pub fn kind(&self) -> StatsKind {
        self.kind
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn init(
        &mut self,
        gpu: &GpuDevice,
        provider: &KernelProvider,
        table: &mut SlotTable,
    ) -> Result<(), StageError> {
        // Both kernels first: a missing/broken kernel must not leak slots.
        let fill_kernel = provider.load(gpu, "fill")?;
        let stats_kernel = provider.load(gpu, self.kind.kernel_name())?;

        let mut fill = Surface::create(gpu, self.width, self.height, None);
        fill.bind_as_input(table)?;

        let mut root = Surface::create(gpu, self.width, self.height, None);
        if let Err(e) = root.bind_as_input(table) {
            let _ = fill.unbind(table);
            return Err(e.into());
        }

        let engine = match ReductionEngine::new(gpu, table, self.width, self.height) {
            Ok(engine) => engine,
            Err(e) => {
                let _ = fill.unbind(table);
                let _ = root.unbind(table);
                return Err(e.into());
            }
        };

        // The statistics surface is written, read back, never sampled —
        // it needs no slot.
        let stats = Surface::create(gpu, STATS_WIDTH, 1, None);
        if let Err(e) = self.stats_target.attach(&stats) {
            let _ = fill.unbind(table);
            let _ = root.unbind(table);
            let _ = engine.release(table);
            return Err(e.into());
        }

        self.fill_kernel = Some(fill_kernel);
        self.stats_kernel = Some(stats_kernel);
        self.engine = Some(engine);
        self.fill = Some(fill);
        self.root = Some(root);
        self.stats = Some(stats);
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    pub fn update_inputs(&mut self, label_slot: Slot) {
        self.label_slot = Some(label_slot);
    }

    /// Select the component the next `run` measures, by its root
    /// coordinate (from the reduction stage's compacted result).
    pub fn set_target(&mut self, label: (u16, u16)) {
        self.target_label = Some(label);
    }

    /// The default dispatch sequence: count at offset 0, or coordinate
    /// sums at offsets 1 and 2.
    pub fn run(&mut self, gpu: &GpuDevice, table: &SlotTable) -> Result<Duration, StageError> {
        let start = Instant::now();
        match self.kind {
            StatsKind::Counting => {
                self.run_packed(gpu, table, CHANNEL_COUNT, 0)?;
            }
            StatsKind::Centroiding => {
                self.run_packed(gpu, table, CHANNEL_SUM_X, 0)?;
                self.run_packed(gpu, table, CHANNEL_SUM_Y, 1)?;
            }
        }
        self.state = Lifecycle::Running;
        Ok(start.elapsed())
    }

    /// The state gate shared by every dispatching operation.
    fn ensure_runnable(&self) -> Result<(), StageError> {
        match self.state {
            Lifecycle::Initialized | Lifecycle::Running => Ok(()),
            _ => Err(StageError::NotInitialized),
        }
    }

    /// One scalar reduction, stored at `offset`. `coordinate` selects
    /// the summed axis for centroid kernels (ignored by count).
    pub fn run_packed(
        &mut self,
        gpu: &GpuDevice,
        table: &SlotTable,
        offset: i32,
        coordinate: i32,
    ) -> Result<(), StageError> {
        self.ensure_runnable()?;
        let label_slot = self.label_slot.ok_or(StageError::MissingInput)?;
        let target = self.target_label.ok_or(StageError::MissingInput)?;

        let fill_kernel = self.fill_kernel.as_mut().ok_or(StageError::NotInitialized)?;
        let stats_kernel = self.stats_kernel.as_mut().ok_or(StageError::NotInitialized)?;
        let engine = self.engine.as_mut().ok_or(StageError::NotInitialized)?;
        let fill = self.fill.as_mut().ok_or(StageError::NotInitialized)?;
        let root = self.root.as_mut().ok_or(StageError::NotInitialized)?;

        let dims = UniformValue::Vec2([self.width as f32, self.height as f32]);

        // 1. Fill: mask of the target component.
        fill_kernel.bind_uniform("u_texDimensions", dims)?;
        fill_kernel.bind_uniform(
            "u_factor",
            UniformValue::Vec2([target.0 as f32, target.1 as f32]),
        )?;
        fill_kernel.bind_sampler("s_fill", label_slot)?;
        self.fill_target.attach(fill)?;
        fill_kernel.dispatch(gpu, table, &self.fill_target)?;

        // 2. Scan the mask. The fill surface stays untouched by the
        //    engine, so repeated invocations re-seed from the same mask.
        stats_kernel.bind_uniform("u_coordinate", UniformValue::Int(coordinate))?;
        let fill_slot = fill.slot().ok_or(StageError::NotInitialized)?;
        // s_result is only read in STORE mode; it still needs a resident
        // surface bound through the scan passes.
        stats_kernel.bind_sampler("s_result", fill_slot)?;
        engine.run(gpu, stats_kernel, table, fill_slot, root, self.kind.scan_kind())?;

        // 3. Store the grid total into the statistics surface. The scan
        //    left the result in the root, whose slot feeds s_result.
        let root_slot = root.slot().ok_or(StageError::NotInitialized)?;
        stats_kernel.bind_uniform("u_stage", UniformValue::Int(MODE_STORE))?;
        stats_kernel.bind_uniform("u_savingOffset", UniformValue::Int(offset))?;
        stats_kernel.bind_sampler("s_result", root_slot)?;
        stats_kernel.dispatch(gpu, table, &self.stats_target)?;
        Ok(())
    }

    /// The statistics surface: texel `CHANNEL_*` holds the u32-packed
    /// scalar written at that offset.
    pub fn result(&self) -> Option<&Surface> {
        self.stats.as_ref()
    }

    /// Synchronous readback of one packed scalar.
    pub fn read_channel(&self, gpu: &GpuDevice, offset: i32) -> Option<u32> {
        let stats = self.stats.as_ref()?;
        let values = stats.readback_values(gpu);
        values.get(offset as usize).copied()
    }

    pub fn release(&mut self, table: &mut SlotTable) -> Result<(), StageError> {
        if !matches!(self.state, Lifecycle::Initialized | Lifecycle::Running) {
            return Ok(());
        }
        if let Some(engine) = self.engine.take() {
            engine.release(table)?;
        }
        if let Some(fill) = self.fill.take() {
            fill.destroy(table)?;
        }
        if let Some(root) = self.root.take() {
            root.destroy(table)?;
        }
        self.stats = None;
        self.fill_kernel = None;
        self.stats_kernel = None;
        self.fill_target.detach();
        self.stats_target.detach();
        self.label_slot = None;
        self.state = Lifecycle::Released;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// The closed stage set
// ---------------------------------------------------------------------------

/// The pipeline's stages, dispatched through one interface. The set is
/// fixed at design time; labeling is the upstream producer of the input
/// surface, not a stage of this engine.
pub enum Stage {
    Reduction(ReductionStage),
    Counting(StatsStage),
    Centroiding(StatsStage),
}

impl Stage {
    pub fn reduction(width: u32, height: u32) -> Self {
        Stage::Reduction(ReductionStage::new(width, height))
    }

    pub fn counting(width: u32, height: u32) -> Self {
        Stage::Counting(StatsStage::new(StatsKind::Counting, width, height))
    }

    pub fn centroiding(width: u32, height: u32) -> Self {
        Stage::Centroiding(StatsStage::new(StatsKind::Centroiding, width, height))
    }

    pub fn state(&self) -> Lifecycle {
        match self {
            Stage::Reduction(s) => s.state(),
            Stage::Counting(s) | Stage::Centroiding(s) => s.state(),
        }
    }

    pub fn init(
        &mut self,
        gpu: &GpuDevice,
        provider: &KernelProvider,
        table: &mut SlotTable,
    ) -> Result<(), StageError> {
        match self {
            Stage::Reduction(s) => s.init(gpu, provider, table),
            Stage::Counting(s) | Stage::Centroiding(s) => s.init(gpu, provider, table),
        }
    }

    pub fn update_inputs(&mut self, label_slot: Slot) {
        match self {
            Stage::Reduction(s) => s.update_inputs(label_slot),
            Stage::Counting(s) | Stage::Centroiding(s) => s.update_inputs(label_slot),
        }
    }

    pub fn run(&mut self, gpu: &GpuDevice, table: &SlotTable) -> Result<Duration, StageError> {
        match self {
            Stage::Reduction(s) => s.run(gpu, table),
            Stage::Counting(s) | Stage::Centroiding(s) => s.run(gpu, table),
        }
    }

    pub fn release(&mut self, table: &mut SlotTable) -> Result<(), StageError> {
        match self {
            Stage::Reduction(s) => s.release(table),
            Stage::Counting(s) | Stage::Centroiding(s) => s.release(table),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- lifecycle (no GPU) ------------------------------------------------

    #[test]
    fn new_stage_is_uninitialized() {
        assert_eq!(Stage::reduction(8, 8).state(), Lifecycle::Uninitialized);
        assert_eq!(Stage::counting(8, 8).state(), Lifecycle::Uninitialized);
        assert_eq!(Stage::centroiding(8, 8).state(), Lifecycle::Uninitialized);
    }

    #[test]
    fn release_before_init_is_a_noop() {
        let mut table = SlotTable::new();
        let mut stage = Stage::reduction(8, 8);
        stage.release(&mut table).unwrap();
        // Not flipped to Released: the stage was never initialized.
        assert_eq!(stage.state(), Lifecycle::Uninitialized);
        assert_eq!(table.allocator().occupied_count(), 0);
    }

    #[test]
    fn run_gate_rejects_uninitialized_stage() {
        // `run` checks this gate before touching the device.
        let stage = ReductionStage::new(8, 8);
        assert!(matches!(
            stage.ensure_runnable(),
            Err(StageError::NotInitialized)
        ));

        let stats = StatsStage::new(StatsKind::Counting, 8, 8);
        assert!(matches!(
            stats.ensure_runnable(),
            Err(StageError::NotInitialized)
        ));
    }

    // ---- GPU pipeline (subprocess-isolated, validated against stats.rs) ----

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args([
                "test", "--lib", "--",
                test_name, "--exact", "--ignored", "--nocapture",
            ])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    use crate::label::LabelImage;
    use crate::stats;

    fn two_component_image() -> LabelImage {
        let mut img = LabelImage::new(16, 12);
        img.fill_component(2, 1, 4, 3); // 12 pixels, root (2, 1)
        img.fill_component(9, 5, 3, 5); // 15 pixels, root (9, 5)
        img
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_reduction_stage_counts_labels() {
        let img = two_component_image();
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let provider = KernelProvider::new(&gpu);
        let mut table = SlotTable::new();

        let mut label = Surface::create(
            &gpu,
            img.width() as u32,
            img.height() as u32,
            Some(img.as_bytes()),
        );
        let label_slot = label.bind_as_input(&mut table).unwrap();

        let mut stage = ReductionStage::new(img.width() as u32, img.height() as u32);
        stage.init(&gpu, &provider, &mut table).unwrap();
        stage.update_inputs(label_slot);

        let elapsed = stage.run(&gpu, &table).unwrap();
        eprintln!("[test] reduction stage: {elapsed:?}");
        assert_eq!(stage.state(), Lifecycle::Running);

        assert_eq!(
            stage.read_label_count(&gpu),
            Some(stats::label_count(&img))
        );

        // The whole grid must match the CPU reference scan of the
        // presence seed, not just the corner total.
        let mut seed = vec![0u32; img.width() * img.height()];
        for (x, y, _) in img.texels() {
            if img.is_root(x, y) {
                seed[y * img.width() + x] = 1;
            }
        }
        let expect = crate::scan::scan_2d(&seed, img.width(), img.height());
        let got: Vec<u32> = stage
            .result()
            .unwrap()
            .readback_values(&gpu)
            .into_iter()
            .map(|v| v & 0xffff)
            .collect();
        assert_eq!(got, expect);

        // Re-running is allowed and must give the same answer.
        stage.run(&gpu, &table).unwrap();
        assert_eq!(stage.read_label_count(&gpu), Some(2));

        stage.release(&mut table).unwrap();
        label.destroy(&mut table).unwrap();
        assert_eq!(table.allocator().occupied_count(), 0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_stats_stages_match_cpu_reference() {
        let img = two_component_image();
        let reference = stats::collect_stats(&img);
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let provider = KernelProvider::new(&gpu);
        let mut table = SlotTable::new();

        let (w, h) = (img.width() as u32, img.height() as u32);
        let mut label = Surface::create(&gpu, w, h, Some(img.as_bytes()));
        let label_slot = label.bind_as_input(&mut table).unwrap();

        let mut counting = StatsStage::new(StatsKind::Counting, w, h);
        let mut centroiding = StatsStage::new(StatsKind::Centroiding, w, h);
        counting.init(&gpu, &provider, &mut table).unwrap();
        centroiding.init(&gpu, &provider, &mut table).unwrap();
        counting.update_inputs(label_slot);
        centroiding.update_inputs(label_slot);

        for expect in &reference {
            counting.set_target(expect.label);
            centroiding.set_target(expect.label);
            counting.run(&gpu, &table).unwrap();
            centroiding.run(&gpu, &table).unwrap();

            let count = counting.read_channel(&gpu, CHANNEL_COUNT).unwrap();
            let sum_x = centroiding.read_channel(&gpu, CHANNEL_SUM_X).unwrap();
            let sum_y = centroiding.read_channel(&gpu, CHANNEL_SUM_Y).unwrap();

            assert_eq!(count, expect.count, "count of {:?}", expect.label);
            let cx = sum_x as f32 / count as f32;
            let cy = sum_y as f32 / count as f32;
            assert!(
                (cx - expect.cx).abs() < 1e-6 && (cy - expect.cy).abs() < 1e-6,
                "centroid of {:?}: got ({cx}, {cy}), want ({}, {})",
                expect.label,
                expect.cx,
                expect.cy,
            );
        }

        counting.release(&mut table).unwrap();
        centroiding.release(&mut table).unwrap();
        label.destroy(&mut table).unwrap();
        assert_eq!(table.allocator().occupied_count(), 0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_failed_init_leaves_stage_uninitialized() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let provider = KernelProvider::new(&gpu);
        let mut table = SlotTable::new();

        // Exhaust the pool so surface binding inside init must fail.
        let mut hogs = Vec::new();
        while table.allocator().occupied_count() < table.allocator().pool_size() {
            let mut s = Surface::create(&gpu, 2, 2, None);
            s.bind_as_input(&mut table).unwrap();
            hogs.push(s);
        }

        let mut stage = ReductionStage::new(8, 8);
        let err = stage.init(&gpu, &provider, &mut table).unwrap_err();
        assert!(matches!(
            err,
            StageError::Engine(EngineError::Slots(SlotError::ExhaustedPool))
        ));
        assert_eq!(stage.state(), Lifecycle::Uninitialized);
        // A failed init must not leak slots: release is a no-op and the
        // pool still holds exactly the hog bindings.
        stage.release(&mut table).unwrap();
        assert_eq!(table.allocator().occupied_count(), hogs.len());

        for s in hogs {
            s.destroy(&mut table).unwrap();
        }
        println!("GPU_TEST_OK");
    }

    macro_rules! gpu_test {
        ($outer:ident, $inner:ident) => {
            #[test]
            #[ignore = "requires a real Vulkan GPU"]
            fn $outer() {
                let out = run_gpu_test_in_subprocess(concat!(
                    "gpu::stage::tests::",
                    stringify!($inner)
                ));
                assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
            }
        };
    }

    gpu_test!(test_reduction_stage, inner_reduction_stage_counts_labels);
    gpu_test!(test_stats_stages, inner_stats_stages_match_cpu_reference);
    gpu_test!(test_failed_init, inner_failed_init_leaves_stage_uninitialized);
}
