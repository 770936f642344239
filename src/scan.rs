// scan.rs — CPU reference implementation of the two-stage parallel scan.
//
// The GPU engine in gpu/reduce.rs executes the scan as full-grid kernel
// passes; this module executes the *same* per-pass arithmetic one element
// at a time, so tests can compare the GPU result (and the pass-structured
// emulation) against a plain sequential implementation.
//
// PASS STRUCTURE
// ───────────────
// A 1D scan over `length` elements runs 2 · ⌈log2(length)⌉ passes:
//
//   up-sweep   (running sum):    pass p = 0 .. n-1, partner at i - 2^p.
//                                Out-of-range partner ⇒ element passes
//                                through unchanged. After the last pass
//                                every element holds the inclusive prefix
//                                sum of the seed.
//
//   down-sweep (binary search):  pass p = n-1 .. 0, mirrored order.
//                                Each output rank k refines a cursor by
//                                probing 2^p ahead into the prefix array;
//                                a probe past the end is a no-op. After
//                                the last pass the cursor of rank k is the
//                                first index whose prefix sum reaches k+1,
//                                i.e. the position of the k-th root.
//
// The mirrored ordering of the two loops is load-bearing: the down-sweep
// step sizes must cover exactly the range the up-sweep built.

// ---------------------------------------------------------------------------
// Pass bookkeeping
// ---------------------------------------------------------------------------

/// Number of passes per scan half: ⌈log2(length)⌉.
///
/// `length = 1` needs zero passes (the seed already is the result);
/// `length = 5` needs 3 (offsets 1, 2, 4).
#[inline]
pub fn ceil_log2(length: u32) -> u32 {
    if length <= 1 {
        0
    } else {
        32 - (length - 1).leading_zeros()
    }
}

/// The partner offsets of the up-sweep, in ascending pass order:
/// `[1, 2, 4, ..., 2^(ceil_log2(length)-1)]`. The down-sweep uses the
/// same offsets reversed.
pub fn pass_offsets(length: u32) -> Vec<u32> {
    (0..ceil_log2(length)).map(|p| 1 << p).collect()
}

// ---------------------------------------------------------------------------
// Up-sweep (running sum)
// ---------------------------------------------------------------------------

/// One running-sum pass: `out[i] = v[i] + v[i - offset]`, with the
/// combine skipped where the partner index falls outside `[0, length)`.
/// This is the exact per-element arithmetic of the RUNNING_SUM kernel.
pub fn running_sum_pass(values: &[u32], offset: u32) -> Vec<u32> {
    let offset = offset as usize;
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| if i >= offset { v + values[i - offset] } else { v })
        .collect()
}

/// Full up-sweep: all ⌈log2(length)⌉ passes in ascending order.
/// The result is the inclusive prefix sum of the seed.
pub fn running_sum(seed: &[u32]) -> Vec<u32> {
    let mut values = seed.to_vec();
    for offset in pass_offsets(seed.len() as u32) {
        values = running_sum_pass(&values, offset);
    }
    values
}

/// Sequential inclusive prefix sum — the ground truth `running_sum`
/// must agree with for every input.
pub fn sequential_prefix(seed: &[u32]) -> Vec<u32> {
    let mut sum = 0u32;
    seed.iter()
        .map(|&v| {
            sum += v;
            sum
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Down-sweep (binary search)
// ---------------------------------------------------------------------------

/// One binary-search pass: for each rank `k`, advance its cursor by
/// `offset` if the prefix sum just before the probe is still below the
/// target rank. Probes past the end of the array are no-ops — this is the
/// down-sweep counterpart of the up-sweep boundary rule.
pub fn binary_search_pass(cursors: &mut [u32], prefix: &[u32], offset: u32) {
    let len = prefix.len() as u32;
    for (k, cursor) in cursors.iter_mut().enumerate() {
        let probe = *cursor + offset;
        if probe <= len && prefix[(probe - 1) as usize] < (k as u32 + 1) {
            *cursor = probe;
        }
    }
}

/// Full down-sweep over a prefix-sum array: offsets in mirrored
/// (descending) order. Afterwards `cursor[k]` is the first index whose
/// prefix sum is ≥ k+1, or `prefix.len()` when rank k does not exist.
pub fn binary_search(prefix: &[u32]) -> Vec<u32> {
    let mut cursors = vec![0u32; prefix.len()];
    for offset in pass_offsets(prefix.len() as u32).into_iter().rev() {
        binary_search_pass(&mut cursors, prefix, offset);
    }
    cursors
}

/// Compaction reference: `out[k]` = payload of the k-th non-zero seed
/// element, remaining slots zero. This is what the full scan (up-sweep
/// followed by down-sweep) computes per 1D line.
pub fn compact(seed: &[u32], payload: &[u32]) -> Vec<u32> {
    let prefix = running_sum(seed);
    let cursors = binary_search(&prefix);
    let total = *prefix.last().unwrap_or(&0);
    cursors
        .iter()
        .enumerate()
        .map(|(k, &c)| {
            if (k as u32) < total {
                payload[c as usize]
            } else {
                0
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Separable 2D scan
// ---------------------------------------------------------------------------

/// Row-wise then column-wise running sum, exactly as the engine executes
/// it (the column pass consumes the row pass's output). Input and output
/// are row-major `width * height` element slices.
pub fn scan_2d(seed: &[u32], width: usize, height: usize) -> Vec<u32> {
    assert_eq!(seed.len(), width * height);
    let mut grid = seed.to_vec();

    for y in 0..height {
        let row = running_sum(&grid[y * width..(y + 1) * width]);
        grid[y * width..(y + 1) * width].copy_from_slice(&row);
    }
    for x in 0..width {
        let col: Vec<u32> = (0..height).map(|y| grid[y * width + x]).collect();
        let col = running_sum(&col);
        for (y, v) in col.into_iter().enumerate() {
            grid[y * width + x] = v;
        }
    }
    grid
}

/// Sequential form of the separable 2D scan: each element holds the sum
/// of the seed over the rectangle from the origin up to and including it.
pub fn sequential_scan_2d(seed: &[u32], width: usize, height: usize) -> Vec<u32> {
    assert_eq!(seed.len(), width * height);
    let mut out = vec![0u32; width * height];
    for y in 0..height {
        for x in 0..width {
            let left = if x > 0 { out[y * width + x - 1] } else { 0 };
            let up = if y > 0 { out[(y - 1) * width + x] } else { 0 };
            let diag = if x > 0 && y > 0 {
                out[(y - 1) * width + x - 1]
            } else {
                0
            };
            out[y * width + x] = seed[y * width + x] + left + up - diag;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
        assert_eq!(ceil_log2(1024), 10);
    }

    #[test]
    fn offsets_for_length_5() {
        assert_eq!(pass_offsets(5), vec![1, 2, 4]);
    }

    #[test]
    fn length_1_runs_zero_passes() {
        assert!(pass_offsets(1).is_empty());
        assert_eq!(running_sum(&[7]), vec![7]);
        assert_eq!(binary_search(&[1]), vec![0]);
    }

    #[test]
    fn up_sweep_matches_hand_computed_length_5() {
        // Hand-computed scan of [a, b, c, d, e] = [3, 0, 1, 4, 2]:
        //   offset 1: [3, 3, 1, 5, 6]
        //   offset 2: [3, 3, 4, 8, 7]
        //   offset 4: [3, 3, 4, 8, 10]
        let seed = [3u32, 0, 1, 4, 2];

        let p1 = running_sum_pass(&seed, 1);
        assert_eq!(p1, vec![3, 3, 1, 5, 6]);
        let p2 = running_sum_pass(&p1, 2);
        assert_eq!(p2, vec![3, 3, 4, 8, 7]);
        let p4 = running_sum_pass(&p2, 4);
        assert_eq!(p4, vec![3, 3, 4, 8, 10]);

        assert_eq!(p4, sequential_prefix(&seed));
    }

    #[test]
    fn boundary_elements_length_5() {
        // Element 0 has no in-range partner at any offset: it must pass
        // through unchanged on every up-sweep pass.
        let seed = [9u32, 1, 1, 1, 1];
        let mut v = seed.to_vec();
        for offset in pass_offsets(5) {
            v = running_sum_pass(&v, offset);
            assert_eq!(v[0], 9, "element 0 must pass through at offset {offset}");
        }

        // Element 4: every probe from cursor 0 at offset 4 lands exactly on
        // the end; one past it must be a no-op. With a single root at
        // index 4, rank 0's cursor must binary-search its way to 4 and
        // rank 1's probes must all be rejected (no second root).
        let seed = [0u32, 0, 0, 0, 1];
        let prefix = running_sum(&seed);
        assert_eq!(prefix, vec![0, 0, 0, 0, 1]);
        let cursors = binary_search(&prefix);
        assert_eq!(cursors[0], 4, "rank 0 resolves to the only root");
        assert_eq!(cursors[1], 5, "rank 1 walks off the end (absent)");
    }

    #[test]
    fn up_sweep_matches_sequential_on_awkward_lengths() {
        for len in [1usize, 2, 3, 5, 6, 7, 9, 16, 17, 31, 33, 100] {
            let seed: Vec<u32> = (0..len).map(|i| ((i * 7 + 3) % 5) as u32).collect();
            assert_eq!(
                running_sum(&seed),
                sequential_prefix(&seed),
                "length {len}"
            );
        }
    }

    #[test]
    fn compaction_places_roots_by_rank() {
        // Roots at 1, 2, 5 with payloads 10, 20, 50.
        let seed = [0u32, 1, 1, 0, 0, 1, 0];
        let payload = [0u32, 10, 20, 0, 0, 50, 0];
        assert_eq!(compact(&seed, &payload), vec![10, 20, 50, 0, 0, 0, 0]);
    }

    #[test]
    fn compaction_of_empty_line_is_empty() {
        let seed = [0u32; 6];
        assert_eq!(compact(&seed, &seed), vec![0; 6]);
    }

    #[test]
    fn scan_2d_single_root_at_origin() {
        // The end-to-end reference scenario: 4×4 grid, one seed of value 1
        // at (0, 0). Every element's rectangle contains the origin, so the
        // scanned grid is all ones — the running count of non-zero seeds
        // up to and including each position.
        let mut seed = vec![0u32; 16];
        seed[0] = 1;
        let out = scan_2d(&seed, 4, 4);
        assert_eq!(out, vec![1; 16]);
        assert_eq!(out, sequential_scan_2d(&seed, 4, 4));
    }

    #[test]
    fn scan_2d_matches_sequential() {
        let width = 5;
        let height = 3;
        let seed: Vec<u32> = (0..width * height)
            .map(|i| ((i * 11 + 2) % 3) as u32)
            .collect();
        assert_eq!(
            scan_2d(&seed, width, height),
            sequential_scan_2d(&seed, width, height)
        );
    }
}
