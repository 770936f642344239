// labelscan — GPU-resident per-label statistics over label images.
//
// The CPU reference implementation of the scan and of the per-label
// statistics lives at the crate root; the GPU engine is under gpu/.
// Every GPU result is validated against the CPU modules in tests.

pub mod label;
pub mod scan;
pub mod stats;

pub mod gpu;
