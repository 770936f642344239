// tests/test_scan.rs — Integration tests for the CPU reference scan.
//
// These pin the pass structure the GPU engine mirrors: pass counts,
// mirrored ordering, boundary pass-through, and agreement between the
// pass-structured emulation and the plain sequential scan.

use labelscan::gpu::reduce::{Direction, ScanDescriptor, SubMode};
use labelscan::scan;

// ===== Pass bookkeeping =====

#[test]
fn up_and_down_sweep_pass_counts_are_equal() {
    for length in 1u32..=64 {
        let up = ScanDescriptor {
            length,
            direction: Direction::Horizontal,
            mode: SubMode::RunningSum,
        };
        let down = ScanDescriptor {
            length,
            direction: Direction::Horizontal,
            mode: SubMode::BinarySearch,
        };
        assert_eq!(up.pass_count(), scan::ceil_log2(length));
        assert_eq!(up.pass_count(), down.pass_count(), "length {length}");

        let mut mirrored = up.pass_order();
        mirrored.reverse();
        assert_eq!(down.pass_order(), mirrored, "length {length}");
    }
}

#[test]
fn offsets_double_each_pass() {
    assert_eq!(scan::pass_offsets(5), vec![1, 2, 4]);
    assert_eq!(
        scan::pass_offsets(1024),
        (0..10u32).map(|p| 1u32 << p).collect::<Vec<u32>>()
    );
}

// ===== Running sum =====

#[test]
fn scan_agrees_with_sequential_across_sizes() {
    for len in [1usize, 2, 3, 4, 5, 7, 8, 9, 15, 16, 17, 64, 100, 257] {
        let seed: Vec<u32> = (0..len).map(|i| ((i * 13 + 5) % 4) as u32).collect();
        assert_eq!(
            scan::running_sum(&seed),
            scan::sequential_prefix(&seed),
            "length {len}"
        );
    }
}

#[test]
fn boundary_passthrough_length_5() {
    // Element 0 never has an in-range partner: it keeps its seed value
    // through every pass. Element 4's partners (3, 2, 0) are all in
    // range, so it accumulates the full prefix.
    let seed = [5u32, 1, 1, 1, 1];
    let out = scan::running_sum(&seed);
    assert_eq!(out[0], 5);
    assert_eq!(out[4], 9);
}

// ===== Compaction =====

#[test]
fn compaction_is_rank_ordered_and_stable() {
    let seed = [1u32, 0, 1, 0, 0, 0, 1, 1];
    let payload = [11u32, 0, 33, 0, 0, 0, 77, 88];
    assert_eq!(
        scan::compact(&seed, &payload),
        vec![11, 33, 77, 88, 0, 0, 0, 0]
    );
}

// ===== Separable 2D =====

#[test]
fn separable_2d_matches_rectangle_sums() {
    for (w, h) in [(1usize, 1usize), (4, 4), (5, 3), (16, 9), (17, 17)] {
        let seed: Vec<u32> = (0..w * h).map(|i| ((i * 7 + 1) % 3) as u32).collect();
        assert_eq!(
            scan::scan_2d(&seed, w, h),
            scan::sequential_scan_2d(&seed, w, h),
            "{w}x{h}"
        );
    }
}

#[test]
fn end_to_end_reference_scenario() {
    // 4×4 grid, one non-zero seed at (0, 0): row-wise then column-wise
    // running sum must count it into every position.
    let mut seed = vec![0u32; 16];
    seed[0] = 1;
    assert_eq!(scan::scan_2d(&seed, 4, 4), vec![1; 16]);
}
