// gpu/reduce.rs — the two-stage parallel scan over ping-ponged surfaces.
//
// One full scan = five steps, mirroring the phase structure of the
// render-kernel pipeline:
//
//   1. Seed: copy the source surface into the caller's root surface,
//      applying the kernel's ROOT_INIT transform (presence filter, mask
//      pass-through, coordinate contribution — the kernel's business).
//   2. Horizontal: ⌈log2(width)⌉ ascending running-sum passes, then the
//      same count of binary-search passes in mirrored descending order.
//      Each pass reads one ping-pong surface and writes the other, with
//      exactly one read/write swap after every pass.
//   3. Hand-over: the surface holding the horizontal result becomes the
//      scan input of the vertical pass by swapping surface identities
//      with the root — slot and texture move together, nothing is
//      copied.
//   4. Vertical: same as 2 over the height.
//   5. The final result again lands in the caller's root surface.
//
// Pass 0 of each direction reads `s_values` (the root); later passes
// read `s_texture` (the ping-pong). The mirrored down-sweep order is
// load-bearing: the binary-search step sizes must cover exactly the
// range the up-sweep built.
//
// A direction of length 1 runs zero passes and skips the hand-over — the
// result already sits in the root.

use std::fmt;

use crate::gpu::device::GpuDevice;
use crate::gpu::kernel::{
    DispatchError, KernelHandle, UniformValue, MODE_BINARY_SEARCH, MODE_ROOT_INIT,
    MODE_RUNNING_SUM,
};
use crate::gpu::pingpong::PingPong;
use crate::gpu::slots::{Slot, SlotError, SlotTable};
use crate::gpu::surface::{RenderTarget, Surface, TargetError};
use crate::scan::ceil_log2;

// ---------------------------------------------------------------------------
// Scan descriptors
// ---------------------------------------------------------------------------

/// The axis a 1D scan runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl Direction {
    /// Value of the `u_direction` uniform.
    #[inline]
    pub fn uniform(self) -> i32 {
        match self {
            Direction::Horizontal => 0,
            Direction::Vertical => 1,
        }
    }

    /// The scanned dimension of a `width × height` grid.
    #[inline]
    pub fn length_of(self, width: u32, height: u32) -> u32 {
        match self {
            Direction::Horizontal => width,
            Direction::Vertical => height,
        }
    }
}

/// The two pass sub-modes of a scan half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    RunningSum,
    BinarySearch,
}

impl SubMode {
    /// Value of the `u_stage` uniform.
    #[inline]
    pub fn uniform(self) -> i32 {
        match self {
            SubMode::RunningSum => MODE_RUNNING_SUM,
            SubMode::BinarySearch => MODE_BINARY_SEARCH,
        }
    }
}

/// One scan half: a direction, the length along it, and the sub-mode.
/// The pass count and ordering are derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanDescriptor {
    pub length: u32,
    pub direction: Direction,
    pub mode: SubMode,
}

impl ScanDescriptor {
    /// ⌈log2(length)⌉ — zero for length 1.
    #[inline]
    pub fn pass_count(&self) -> u32 {
        ceil_log2(self.length)
    }

    /// Pass indices in dispatch order: ascending for running-sum,
    /// mirrored descending for binary-search.
    pub fn pass_order(&self) -> Vec<u32> {
        let n = self.pass_count();
        match self.mode {
            SubMode::RunningSum => (0..n).collect(),
            SubMode::BinarySearch => (0..n).rev().collect(),
        }
    }
}

/// Whether a scan runs both halves or only the running sums. Kernels
/// that spend the cursor field on 32-bit accumulation (centroid) cannot
/// take a binary-search pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Running sum + binary search: prefix values and compaction cursors.
    Compaction,
    /// Running sum only: prefix values, cursor field left to the kernel.
    SumOnly,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum EngineError {
    Slots(SlotError),
    Target(TargetError),
    Dispatch(DispatchError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Slots(e) => write!(f, "{e}"),
            EngineError::Target(e) => write!(f, "{e}"),
            EngineError::Dispatch(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Slots(e) => Some(e),
            EngineError::Target(e) => Some(e),
            EngineError::Dispatch(e) => Some(e),
        }
    }
}

impl From<SlotError> for EngineError {
    fn from(e: SlotError) -> Self {
        EngineError::Slots(e)
    }
}

impl From<TargetError> for EngineError {
    fn from(e: TargetError) -> Self {
        EngineError::Target(e)
    }
}

impl From<DispatchError> for EngineError {
    fn from(e: DispatchError) -> Self {
        EngineError::Dispatch(e)
    }
}

// ---------------------------------------------------------------------------
// ReductionEngine
// ---------------------------------------------------------------------------

/// The scan executor. Owns the two ping-pong surfaces and their render
/// targets; the seed source and the root/result surface are the
/// caller's. Reusable across frames — `run` re-seeds every time.
pub struct ReductionEngine {
    width: u32,
    height: u32,
    pipo: [Surface; 2],
    targets: [RenderTarget; 2],
    pp: PingPong,
}

impl ReductionEngine {
    /// Create the engine's scratch pair for a `width × height` grid,
    /// acquiring one resource slot per ping-pong surface.
    pub fn new(
        gpu: &GpuDevice,
        table: &mut SlotTable,
        width: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        assert!(width >= 1 && height >= 1, "grid must be at least 1×1");

        let mut first = Surface::create(gpu, width, height, None);
        if let Err(e) = first.bind_as_input(table) {
            return Err(e.into());
        }
        let mut second = Surface::create(gpu, width, height, None);
        if let Err(e) = second.bind_as_input(table) {
            // Keep the pool consistent on the failure path.
            let _ = first.unbind(table);
            return Err(e.into());
        }

        Ok(ReductionEngine {
            width,
            height,
            pipo: [first, second],
            targets: [RenderTarget::new(), RenderTarget::new()],
            pp: PingPong::new(),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Run a full 2D scan: seed from `seed_slot`, scan horizontally,
    /// then vertically. The result is left in `root`, whose slot keeps
    /// feeding the kernel's `s_values` sampler — ready for a consumer
    /// pass or the next `run`.
    pub fn run(
        &mut self,
        gpu: &GpuDevice,
        kernel: &mut KernelHandle,
        table: &SlotTable,
        seed_slot: Slot,
        root: &mut Surface,
        kind: ScanKind,
    ) -> Result<(), EngineError> {
        // Fresh parity every run so repeated invocations are identical.
        self.pp = PingPong::new();

        kernel.bind_uniform(
            "u_texDimensions",
            UniformValue::Vec2([self.width as f32, self.height as f32]),
        )?;

        self.seed(gpu, kernel, table, seed_slot, root)?;

        // Both ping-pong surfaces become render attachments for the pass
        // loops; s_values reads the seeded root from here on.
        self.targets[0].attach(&self.pipo[0])?;
        self.targets[1].attach(&self.pipo[1])?;
        kernel.bind_sampler("s_values", slot_of(root))?;

        self.scan_direction(gpu, kernel, table, Direction::Horizontal, root, kind)?;
        self.scan_direction(gpu, kernel, table, Direction::Vertical, root, kind)?;
        Ok(())
    }

    /// The seed pass: one ROOT_INIT dispatch reading `seed_slot` and
    /// writing the root surface. Pure per-texel function of the source —
    /// seeding twice with the same input writes the same texels.
    fn seed(
        &mut self,
        gpu: &GpuDevice,
        kernel: &mut KernelHandle,
        table: &SlotTable,
        seed_slot: Slot,
        root: &mut Surface,
    ) -> Result<(), EngineError> {
        kernel.bind_uniform("u_stage", UniformValue::Int(MODE_ROOT_INIT))?;
        kernel.bind_sampler("s_values", seed_slot)?;
        // s_texture is not read in ROOT_INIT mode; it still needs a
        // resident surface bound.
        kernel.bind_sampler("s_texture", slot_of(&self.pipo[0]))?;

        self.targets[0].attach(root)?;
        kernel.dispatch(gpu, table, &self.targets[0])?;
        Ok(())
    }

    /// One direction: up-sweep then (for `Compaction`) the mirrored
    /// down-sweep, then the no-copy hand-over of the result into `root`.
    fn scan_direction(
        &mut self,
        gpu: &GpuDevice,
        kernel: &mut KernelHandle,
        table: &SlotTable,
        direction: Direction,
        root: &mut Surface,
        kind: ScanKind,
    ) -> Result<(), EngineError> {
        let length = direction.length_of(self.width, self.height);
        kernel.bind_uniform("u_direction", UniformValue::Int(direction.uniform()))?;

        let up = ScanDescriptor {
            length,
            direction,
            mode: SubMode::RunningSum,
        };
        self.run_passes(gpu, kernel, table, &up)?;

        if kind == ScanKind::Compaction {
            let down = ScanDescriptor {
                length,
                direction,
                mode: SubMode::BinarySearch,
            };
            self.run_passes(gpu, kernel, table, &down)?;
        }

        // Hand the direction's result over to the root by swapping
        // surface identities (slot and texture travel together — no
        // full-grid copy). With zero passes the seed never left the
        // root, so there is nothing to swap.
        if up.pass_count() > 0 {
            let read = self.pp.read();
            Surface::swap_identity(root, &mut self.pipo[read]);
            self.targets[read].attach(&self.pipo[read])?;
            kernel.bind_sampler("s_values", slot_of(root))?;
        }
        Ok(())
    }

    /// The pass loop: dispatch in descriptor order, reading the ping-pong
    /// read surface and writing the write target, swapping parity once
    /// per pass, unconditionally on success.
    fn run_passes(
        &mut self,
        gpu: &GpuDevice,
        kernel: &mut KernelHandle,
        table: &SlotTable,
        desc: &ScanDescriptor,
    ) -> Result<(), EngineError> {
        kernel.bind_uniform("u_stage", UniformValue::Int(desc.mode.uniform()))?;
        for pass in desc.pass_order() {
            kernel.bind_uniform("u_pass", UniformValue::Int(pass as i32))?;
            kernel.bind_sampler("s_texture", slot_of(&self.pipo[self.pp.read()]))?;
            kernel.dispatch(gpu, table, &self.targets[self.pp.write()])?;
            self.pp = self.pp.swap();
        }
        Ok(())
    }

    /// Release the engine's slots. The surfaces drop with the engine.
    pub fn release(mut self, table: &mut SlotTable) -> Result<(), SlotError> {
        let [a, b] = &mut self.pipo;
        a.unbind(table)?;
        b.unbind(table)
    }
}

/// The engine's own surfaces are slot-bound for their whole lifetime;
/// a missing slot here is an engine bug, not a caller error.
fn slot_of(surface: &Surface) -> Slot {
    surface
        .slot()
        .expect("engine surface must stay slot-bound")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
