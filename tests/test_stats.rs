// tests/test_stats.rs — Integration tests for label images and the CPU
// statistics reference.

use labelscan::label::{pack_label, unpack_value, LabelImage};
use labelscan::stats;

#[test]
fn stats_of_synthetic_scene() {
    let mut img = LabelImage::new(64, 48);
    img.fill_component(0, 0, 8, 8);
    img.fill_component(30, 10, 5, 9);
    img.fill_component(50, 40, 14, 8); // clipped at the right/bottom edges

    let all = stats::collect_stats(&img);
    assert_eq!(all.len(), 3);
    assert_eq!(stats::label_count(&img), 3);

    // Clipping: only 14 columns of the last rect fit horizontally, and
    // 8 rows fit vertically.
    let clipped = all.iter().find(|s| s.label == (50, 40)).unwrap();
    assert_eq!(clipped.count, 14 * 8);

    // Centroid of an unclipped w×h rect rooted at (x0, y0) is the rect
    // center.
    let first = all.iter().find(|s| s.label == (0, 0)).unwrap();
    assert!((first.cx - 3.5).abs() < 1e-6);
    assert!((first.cy - 3.5).abs() < 1e-6);
}

#[test]
fn labels_survive_byte_round_trip() {
    let mut img = LabelImage::new(9, 7);
    img.fill_component(2, 2, 4, 3);

    let round = LabelImage::from_raw(9, 7, img.as_bytes());
    assert_eq!(stats::collect_stats(&img), stats::collect_stats(&round));
}

#[test]
fn texel_encoding_matches_scan_values() {
    // A label texel read as a scan value keeps the root coordinate in
    // its two u16 halves — the encoding the kernels rely on.
    let t = pack_label(258, 3);
    let v = unpack_value(t);
    assert_eq!(v & 0xffff, 259); // lo = x + 1
    assert_eq!(v >> 16, 4); // hi = y + 1
}

#[test]
fn overlapping_fill_reassigns_labels() {
    let mut img = LabelImage::new(16, 16);
    img.fill_component(0, 0, 8, 8);
    img.fill_component(4, 4, 8, 8); // overwrites the overlap

    let all = stats::collect_stats(&img);
    assert_eq!(all.len(), 2);
    let first = all.iter().find(|s| s.label == (0, 0)).unwrap();
    let second = all.iter().find(|s| s.label == (4, 4)).unwrap();
    assert_eq!(first.count, 64 - 16);
    assert_eq!(second.count, 64);
}
