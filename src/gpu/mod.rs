// gpu/mod.rs — the GPU reduction/compaction engine.
//
// Everything here executes as rendering kernels: a kernel is a fragment
// program drawn over a fixed two-triangle quad covering the grid, reading
// input surfaces through numbered resource slots and writing the surface
// attached to the active render target. Statistics are produced by
// iterating such kernels over ping-ponged surfaces.
//
// The CPU modules at the crate root (scan.rs, stats.rs) are the
// authoritative reference — every GPU result is validated against them in
// the subprocess-isolated GPU tests.
//
// Module map:
//   device   — adapter selection, device/queue bring-up
//   slots    — resource-slot allocator + slot→view table
//   pingpong — read/write surface index pair
//   surface  — Surface (RGBA8 uint texture) and RenderTarget
//   kernel   — named kernels, uniform/sampler binding, quad dispatch
//   reduce   — the two-stage parallel scan over ping-ponged surfaces
//   stage    — stage lifecycle and the closed stage set

pub mod device;
pub mod kernel;
pub mod pingpong;
pub mod reduce;
pub mod slots;
pub mod stage;
pub mod surface;
