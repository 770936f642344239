// gpu/surface.rs — Surface (RGBA8 uint texture) and RenderTarget.
//
// RESPONSIBILITIES
// ─────────────────
// 1. `Surface` — a width×height grid of 4×u8 texels resident on the GPU,
//    readable by kernels through a resource slot and writable as a render
//    attachment. Creation optionally uploads initial texel data (the
//    label image handed over by the image provider).
//
// 2. `RenderTarget` — the output binding of one kernel dispatch. Exactly
//    one surface may be attached; attachment runs a completeness check
//    (missing attachment or a format mismatch is `IncompleteTarget`).
//
// 3. Readback — synchronous texture → CPU copy for tests and the demo.
//
//
// THE ROW-ALIGNMENT PROBLEM
// ──────────────────────────
// CPU-side label images are tightly packed (stride == width texels), but
// wgpu's buffer↔texture copies require `bytes_per_row` to be a multiple
// of 256. Uploads compact each row into a staging buffer padded to the
// alignment; readbacks strip the padding again. Uploads happen once per
// input, so the extra CPU memcpy is irrelevant next to the scan itself.

use std::mem;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::gpu::device::GpuDevice;
use crate::gpu::slots::{Slot, SlotError, SlotTable};

/// Every surface in the pipeline: 4 channels × 8 bits, integer texels.
/// Kernels read them as `texture_2d<u32>` via `textureLoad` — integer
/// texels make "no filtering, ever" a type-level fact instead of a
/// sampler-state convention.
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Uint;

/// Bytes per texel (4 channels × 8 bits).
pub const BYTES_PER_TEXEL: u32 = 4;

/// wgpu requires buffer↔texture copy rows to be multiples of this.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// A 2D grid of 4×u8 texels on the GPU.
///
/// A surface is bound to at most one resource slot at a time; the slot
/// travels with the surface through `mem::swap`-style identity swaps, so
/// the slot table never needs patching when surfaces change roles.
pub struct Surface {
    texture: wgpu::Texture,
    view: Arc<wgpu::TextureView>,
    width: u32,
    height: u32,
    slot: Option<Slot>,
}

impl Surface {
    /// Allocate a surface, optionally uploading initial texel data
    /// (tightly packed RGBA rows, `width * height * 4` bytes — the layout
    /// `LabelImage::as_bytes` produces).
    ///
    /// # Panics
    /// Panics if `initial` is present with the wrong length. Dimension
    /// limits are the caller's business (`GpuDevice::supports_extent`).
    pub fn create(gpu: &GpuDevice, width: u32, height: u32, initial: Option<&[u8]>) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Surface"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let surface = Surface {
            texture,
            view,
            width,
            height,
            slot: None,
        };
        if let Some(bytes) = initial {
            surface.upload(gpu, bytes);
        }
        surface
    }

    /// Upload tightly packed texel rows, compacting into a 256-aligned
    /// staging buffer.
    pub fn upload(&self, gpu: &GpuDevice, bytes: &[u8]) {
        let row_bytes = self.width * BYTES_PER_TEXEL;
        assert_eq!(
            bytes.len(),
            (row_bytes * self.height) as usize,
            "initial data length ({}) must be width * height * 4 ({})",
            bytes.len(),
            row_bytes * self.height,
        );

        let aligned_bytes_per_row = align_to(row_bytes, COPY_ALIGNMENT);
        let mut staging = vec![0u8; (aligned_bytes_per_row * self.height) as usize];
        for y in 0..self.height as usize {
            let src = y * row_bytes as usize;
            let dst = y * aligned_bytes_per_row as usize;
            staging[dst..dst + row_bytes as usize]
                .copy_from_slice(&bytes[src..src + row_bytes as usize]);
        }

        let staging_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Surface::upload"),
                contents: &staging,
                usage: wgpu::BufferUsages::COPY_SRC,
            });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Surface::upload"),
            });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Read the surface back to CPU memory.
    ///
    /// **Expensive and synchronous** — stalls the GPU. Tests and the demo
    /// only; never on the per-pass path.
    ///
    /// Returns tightly packed RGBA rows (`width * height * 4` bytes).
    pub fn readback(&self, gpu: &GpuDevice) -> Vec<u8> {
        let row_bytes = self.width * BYTES_PER_TEXEL;
        let aligned_bytes_per_row = align_to(row_bytes, COPY_ALIGNMENT);
        let readback_size = (aligned_bytes_per_row * self.height) as u64;

        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface::readback"),
            size: readback_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Surface::readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let buf_slice = readback_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).expect("readback channel closed");
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .expect("readback map callback never fired")
            .expect("readback map failed");

        let mapped = buf_slice.get_mapped_range();
        let mut out = vec![0u8; (row_bytes * self.height) as usize];
        for y in 0..self.height as usize {
            let src = y * aligned_bytes_per_row as usize;
            let dst = y * row_bytes as usize;
            out[dst..dst + row_bytes as usize]
                .copy_from_slice(&mapped[src..src + row_bytes as usize]);
        }
        drop(mapped);
        readback_buf.unmap();
        out
    }

    /// Readback with each texel unpacked as a little-endian u32 scan
    /// value. Row-major, `width * height` entries.
    pub fn readback_values(&self, gpu: &GpuDevice) -> Vec<u32> {
        self.readback(gpu)
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    // --- Slot binding ---

    /// Bind this surface to a resource slot for kernel reads.
    pub fn bind_as_input(&mut self, table: &mut SlotTable) -> Result<Slot, SlotError> {
        if let Some(slot) = self.slot {
            return Err(SlotError::AlreadyBound(slot));
        }
        let slot = table.bind(self.view.clone())?;
        self.slot = Some(slot);
        Ok(slot)
    }

    /// Release this surface's slot, if it holds one.
    pub fn unbind(&mut self, table: &mut SlotTable) -> Result<(), SlotError> {
        match self.slot.take() {
            Some(slot) => table.unbind(slot),
            None => Ok(()),
        }
    }

    /// Destroy the surface: frees its slot (if still bound) and drops the
    /// backing texture.
    pub fn destroy(mut self, table: &mut SlotTable) -> Result<(), SlotError> {
        self.unbind(table)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The slot this surface is currently bound to.
    #[inline]
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    #[inline]
    pub fn view(&self) -> &Arc<wgpu::TextureView> {
        &self.view
    }

    /// Swap the identity of two surfaces — texture, view and slot move
    /// together, only the roles change. This is how the engine hands the
    /// horizontal scan result over to the vertical pass without a
    /// full-grid copy.
    pub fn swap_identity(a: &mut Surface, b: &mut Surface) {
        mem::swap(a, b);
    }
}

// ---------------------------------------------------------------------------
// RenderTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// The render target has no attached surface, or the attached surface
    /// does not satisfy the pipeline's format/extent contract. A caller
    /// lifecycle bug — surfaced immediately, never retried.
    IncompleteTarget(&'static str),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::IncompleteTarget(why) => write!(f, "incomplete render target: {why}"),
        }
    }
}

impl std::error::Error for TargetError {}

/// The output binding of a kernel dispatch. A pair of render targets,
/// each attached to one surface of a ping-pong pair, alternates as the
/// write destination across passes.
pub struct RenderTarget {
    view: Option<Arc<wgpu::TextureView>>,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// A target with nothing attached. Dispatching against it fails the
    /// completeness check.
    pub fn new() -> Self {
        RenderTarget {
            view: None,
            width: 0,
            height: 0,
        }
    }

    /// Attach a surface as the sole write destination.
    ///
    /// The completeness check rejects zero-sized surfaces; the format is
    /// fixed by construction (`SURFACE_FORMAT`), which is the other half
    /// of what a framebuffer-completeness check verifies.
    pub fn attach(&mut self, surface: &Surface) -> Result<(), TargetError> {
        if surface.width() == 0 || surface.height() == 0 {
            return Err(TargetError::IncompleteTarget("zero-sized attachment"));
        }
        self.view = Some(surface.view().clone());
        self.width = surface.width();
        self.height = surface.height();
        Ok(())
    }

    pub fn detach(&mut self) {
        self.view = None;
        self.width = 0;
        self.height = 0;
    }

    /// The attached view, or `IncompleteTarget` if nothing is attached.
    pub fn attached_view(&self) -> Result<&wgpu::TextureView, TargetError> {
        self.view
            .as_deref()
            .ok_or(TargetError::IncompleteTarget("no attached surface"))
    }

    pub fn is_complete(&self) -> bool {
        self.view.is_some()
    }
}

impl Default for RenderTarget {
    fn default() -> Self {
        RenderTarget::new()
    }
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
