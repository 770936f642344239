// stats.rs — CPU reference per-label statistics.
//
// The GPU counting/centroiding stages pack their results into the
// channels of a statistics surface; this module computes the same
// quantities directly from a LabelImage so tests (and the demo overlay)
// have an exact reference to compare against.

use std::collections::HashMap;

use crate::label::LabelImage;

/// Statistics of one connected component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelStats {
    /// The component's label: the coordinate of its root pixel.
    pub label: (u16, u16),
    /// Number of pixels carrying this label.
    pub count: u32,
    /// Centroid x, in pixels.
    pub cx: f32,
    /// Centroid y, in pixels.
    pub cy: f32,
}

/// Compute count and centroid for every label present in the image.
/// Results are sorted by label in row-major root order (y, then x) so the
/// output is deterministic — the same order the compaction scan produces.
pub fn collect_stats(img: &LabelImage) -> Vec<LabelStats> {
    // (count, sum_x, sum_y) per label.
    let mut acc: HashMap<(u16, u16), (u32, u64, u64)> = HashMap::new();

    for (x, y, t) in img.texels() {
        if let Some(label) = crate::label::unpack_label(t) {
            let e = acc.entry(label).or_insert((0, 0, 0));
            e.0 += 1;
            e.1 += x as u64;
            e.2 += y as u64;
        }
    }

    let mut out: Vec<LabelStats> = acc
        .into_iter()
        .map(|(label, (count, sx, sy))| LabelStats {
            label,
            count,
            cx: sx as f32 / count as f32,
            cy: sy as f32 / count as f32,
        })
        .collect();
    out.sort_by_key(|s| (s.label.1, s.label.0));
    out
}

/// Number of distinct labels (the presence reduction's scalar result).
pub fn label_count(img: &LabelImage) -> u32 {
    collect_stats(img).len() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
