// label.rs — CPU-side label image container and channel packing.
//
// Every surface in the pipeline is 4 channels × 8 bits per texel. This
// module fixes what those four bytes mean on the CPU side:
//
//   Label texel:  (lo u16, hi u16), little-endian = (root x, root y).
//                 A pixel's label is the coordinate of its component's
//                 root pixel. Background is the all-zero texel, which is
//                 why interior labels are stored 1-based (see pack_label).
//   Scan texel:   one little-endian u32 across all four bytes. Scan
//                 kernels treat the texel as a plain 32-bit accumulator.
//
// The GPU kernels in gpu/shaders/common.wgsl implement the same packing;
// the two must not drift apart, and the round-trip tests below plus the
// GPU readback tests in gpu/ pin both sides.

use std::fmt;

/// One texel: 4 channels × 8 bits, RGBA order.
pub type Texel = [u8; 4];

/// Background / empty texel.
pub const ZERO_TEXEL: Texel = [0, 0, 0, 0];

// ---------------------------------------------------------------------------
// Channel packing
// ---------------------------------------------------------------------------

/// Pack a root coordinate into a label texel.
///
/// Coordinates are stored 1-based so that the label of the pixel at
/// (0, 0) is distinguishable from background (the all-zero texel).
#[inline]
pub fn pack_label(x: u16, y: u16) -> Texel {
    let lo = x + 1;
    let hi = y + 1;
    [lo as u8, (lo >> 8) as u8, hi as u8, (hi >> 8) as u8]
}

/// Unpack a label texel back into its root coordinate.
/// Returns `None` for the background texel.
#[inline]
pub fn unpack_label(t: Texel) -> Option<(u16, u16)> {
    if t == ZERO_TEXEL {
        return None;
    }
    let lo = t[0] as u16 | (t[1] as u16) << 8;
    let hi = t[2] as u16 | (t[3] as u16) << 8;
    Some((lo - 1, hi - 1))
}

/// Pack a scan accumulator value into a texel (little-endian u32).
#[inline]
pub fn pack_value(v: u32) -> Texel {
    v.to_le_bytes()
}

/// Unpack a scan accumulator value from a texel.
#[inline]
pub fn unpack_value(t: Texel) -> u32 {
    u32::from_le_bytes(t)
}

// ---------------------------------------------------------------------------
// LabelImage
// ---------------------------------------------------------------------------

/// A 2D label image with runtime dimensions, texels stored row-major and
/// tightly packed (no row padding — alignment padding for GPU upload is
/// handled by the staging path in gpu/surface.rs).
pub struct LabelImage {
    data: Vec<Texel>,
    width: usize,
    height: usize,
}

impl Clone for LabelImage {
    fn clone(&self) -> Self {
        LabelImage {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

impl LabelImage {
    /// Create an all-background image.
    pub fn new(width: usize, height: usize) -> Self {
        LabelImage {
            data: vec![ZERO_TEXEL; width * height],
            width,
            height,
        }
    }

    /// Create an image from raw RGBA bytes (length = width * height * 4),
    /// e.g. pixel data handed over by an external image provider.
    ///
    /// # Panics
    /// Panics if `bytes.len() != width * height * 4`.
    pub fn from_raw(width: usize, height: usize, bytes: &[u8]) -> Self {
        assert_eq!(
            bytes.len(),
            width * height * 4,
            "byte length ({}) must equal width * height * 4 ({})",
            bytes.len(),
            width * height * 4,
        );
        let data = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        LabelImage { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Get the texel at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Texel {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, t: Texel) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = t;
    }

    /// The label at (x, y), or `None` for background.
    #[inline]
    pub fn label_at(&self, x: usize, y: usize) -> Option<(u16, u16)> {
        unpack_label(self.get(x, y))
    }

    /// Whether (x, y) is a root pixel: a labeled pixel whose stored label
    /// equals its own coordinate. Exactly one per component.
    #[inline]
    pub fn is_root(&self, x: usize, y: usize) -> bool {
        self.label_at(x, y) == Some((x as u16, y as u16))
    }

    /// Label a rectangular component rooted at its top-left corner.
    /// Every texel in the rect gets the label of (x0, y0). Used by tests
    /// and the demo to synthesize inputs without an image provider.
    pub fn fill_component(&mut self, x0: usize, y0: usize, w: usize, h: usize) {
        let label = pack_label(x0 as u16, y0 as u16);
        for y in y0..(y0 + h).min(self.height) {
            for x in x0..(x0 + w).min(self.width) {
                self.set(x, y, label);
            }
        }
    }

    /// Raw bytes, row-major RGBA, tightly packed. This is the exact layout
    /// `gpu::surface::Surface::create` accepts as initial data.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Iterate over `(x, y, texel)` in row-major order.
    pub fn texels(&self) -> impl Iterator<Item = (usize, usize, Texel)> + '_ {
        let w = self.width;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &t)| (i % w, i / w, t))
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "texel ({x},{y}) out of bounds for {}x{}",
            self.width,
            self.height,
        );
    }
}

impl fmt::Debug for LabelImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabelImage {}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
