// sort.rs — Host reference for lane sorting, median extraction, and the
// bitonic network schedule that the GPU kernel executes.
//
// This module is the authoritative definition of every result the GPU
// produces:
//
//   sort_lanes(img, axis)   → "sort each lane independently, ascending"
//   median_lanes(img, axis) → element `len / 2` of every sorted lane
//
// The GPU path in gpu/ is validated against these functions element for
// element.
//
// BITONIC SCHEDULE
// ────────────────
// For a lane of padded length N = 2^m the network has m stages. Stage k
// (0-indexed) merges blocks of size 2^(k+1) and runs k+1 passes whose
// compare distance ("stride") halves from 2^k down to 1:
//
//   N = 8:  stage 0: stride 1
//           stage 1: stride 2, 1
//           stage 2: stride 4, 2, 1
//
// Within a pass, element i is paired with i XOR stride. The pair is sorted
// ascending when bit `block` of i is clear and descending otherwise, so
// every block of size 2^(k+1) becomes alternately ascending/descending,
// which makes each block of the next stage bitonic. The final stage has
// block == N, so bit N is clear for every index and the merge is ascending
// throughout.
//
// `bitonic_schedule()` produces the pass list once; the GPU pipeline encodes
// exactly that list, in order, and `bitonic_sort_in_place()` runs it on the
// host for tests.
//
// MEDIAN POLICY
// ─────────────
// The median index is `len / 2` (floor). For odd lengths this is the exact
// median; for even lengths it is the upper of the two middle elements. No
// averaging: one read per lane on the device.

use crate::error::{Error, Result};
use crate::image::{Image, Pixel};

// ---------------------------------------------------------------------------
// Axis
// ---------------------------------------------------------------------------

/// Direction along which lanes are sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Sort down each column. `cols` lanes of length `rows`.
    Vertical,
    /// Sort across each row. `rows` lanes of length `cols`.
    Horizontal,
}

impl Axis {
    /// Number of independent lanes for an array of the given shape.
    pub fn lane_count(self, rows: usize, cols: usize) -> usize {
        match self {
            Axis::Vertical => cols,
            Axis::Horizontal => rows,
        }
    }

    /// Number of elements in one lane.
    pub fn lane_len(self, rows: usize, cols: usize) -> usize {
        match self {
            Axis::Vertical => rows,
            Axis::Horizontal => cols,
        }
    }
}

// ---------------------------------------------------------------------------
// Network schedule
// ---------------------------------------------------------------------------

/// One compare-exchange pass of the bitonic network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitonicPass {
    /// Major stage index k.
    pub stage: u32,
    /// Merge block size, 2^(k+1). Selects the direction of each pair.
    pub block: u32,
    /// Compare distance; pairs are (i, i XOR stride).
    pub stride: u32,
}

/// Build the ordered pass list for a lane of `padded_len` elements.
///
/// # Panics
/// Panics if `padded_len` is not a power of two.
pub fn bitonic_schedule(padded_len: u32) -> Vec<BitonicPass> {
    assert!(
        padded_len.is_power_of_two(),
        "padded_len ({padded_len}) must be a power of two"
    );
    let stages = padded_len.trailing_zeros();
    let mut passes = Vec::with_capacity((stages * (stages + 1) / 2) as usize);
    for stage in 0..stages {
        let block = 2u32 << stage;
        let mut stride = 1u32 << stage;
        while stride > 0 {
            passes.push(BitonicPass { stage, block, stride });
            stride >>= 1;
        }
    }
    passes
}

/// Index of the first element of pair `pair` in a pass with the given
/// stride. The partner is `first + stride`, which equals `first ^ stride`
/// because the stride bit of `first` is always clear.
///
/// This is the same mapping the shader uses to give every invocation
/// exactly one pair.
#[inline]
pub fn pair_first_index(pair: u32, stride: u32) -> u32 {
    (pair / stride) * (2 * stride) + (pair % stride)
}

/// Run the bitonic network on a host slice.
///
/// Mirrors the shader: each pass visits `len / 2` pairs. NaN never
/// compares greater or less, so NaN pairs are left in place.
///
/// # Panics
/// Panics if `data.len()` is not a power of two.
pub fn bitonic_sort_in_place(data: &mut [f32]) {
    if data.len() <= 1 {
        return;
    }
    let n = data.len() as u32;
    for pass in bitonic_schedule(n) {
        for pair in 0..n / 2 {
            let i = pair_first_index(pair, pass.stride) as usize;
            let j = i ^ pass.stride as usize;
            let ascending = (i as u32 & pass.block) == 0;
            let (a, b) = (data[i], data[j]);
            if (ascending && a > b) || (!ascending && a < b) {
                data.swap(i, j);
            }
        }
    }
}

/// Lane length rounded up to the next power of two.
#[inline]
pub fn padded_len(true_len: usize) -> usize {
    true_len.next_power_of_two()
}

/// Position of the median element in a sorted lane of `true_len` elements.
#[inline]
pub fn median_index(true_len: usize) -> usize {
    true_len / 2
}

// ---------------------------------------------------------------------------
// Reference implementation
// ---------------------------------------------------------------------------

/// Sort every lane of `src` independently, ascending.
pub fn sort_lanes<T: Pixel>(src: &Image<T>, axis: Axis) -> Image<f32> {
    match axis {
        Axis::Horizontal => {
            let mut data = Vec::with_capacity(src.rows() * src.cols());
            for r in 0..src.rows() {
                let mut lane: Vec<f32> = src.row(r).iter().map(|v| v.to_f32()).collect();
                lane.sort_by(f32::total_cmp);
                data.extend_from_slice(&lane);
            }
            Image::from_vec(src.rows(), src.cols(), data)
        }
        // Sort the rows of the transpose, then transpose back.
        Axis::Vertical => sort_lanes(&src.transpose(), Axis::Horizontal).transpose(),
    }
}

/// Median (element `len / 2` of the sorted lane) of every lane of `src`.
pub fn median_lanes<T: Pixel>(src: &Image<T>, axis: Axis) -> Vec<f32> {
    let sorted = sort_lanes(src, axis);
    let (rows, cols) = src.shape();
    let mid = median_index(axis.lane_len(rows, cols));
    match axis {
        Axis::Vertical => sorted.row(mid).to_vec(),
        Axis::Horizontal => (0..rows).map(|r| sorted.get(r, mid)).collect(),
    }
}

// ---------------------------------------------------------------------------
// HostSeparator
// ---------------------------------------------------------------------------

/// Host-only counterpart of `gpu::Separator`.
///
/// Same shape contract and the same four operations, but results are
/// returned already materialized. Use it when `Separator::new` fails with
/// `Error::NoDeviceAvailable`.
#[derive(Debug, Clone)]
pub struct HostSeparator {
    rows: usize,
    cols: usize,
}

impl HostSeparator {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyShape { rows, cols });
        }
        Ok(HostSeparator { rows, cols })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn sort_vertical<T: Pixel>(&self, src: &Image<T>) -> Result<Image<f32>> {
        self.check_shape(src)?;
        Ok(sort_lanes(src, Axis::Vertical))
    }

    pub fn sort_horizontal<T: Pixel>(&self, src: &Image<T>) -> Result<Image<f32>> {
        self.check_shape(src)?;
        Ok(sort_lanes(src, Axis::Horizontal))
    }

    pub fn filter_vertical<T: Pixel>(&self, src: &Image<T>) -> Result<Vec<f32>> {
        self.check_shape(src)?;
        Ok(median_lanes(src, Axis::Vertical))
    }

    pub fn filter_horizontal<T: Pixel>(&self, src: &Image<T>) -> Result<Vec<f32>> {
        self.check_shape(src)?;
        Ok(median_lanes(src, Axis::Horizontal))
    }

    fn check_shape<T: Pixel>(&self, src: &Image<T>) -> Result<()> {
        check_shape((self.rows, self.cols), src.shape())
    }
}

/// Shared shape guard for the host and GPU separators.
pub(crate) fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(Error::ShapeMismatch { expected, actual });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_pass_counts() {
        // m stages, stage k has k+1 passes → m(m+1)/2 passes total.
        assert_eq!(bitonic_schedule(1).len(), 0);
        assert_eq!(bitonic_schedule(2).len(), 1);
        assert_eq!(bitonic_schedule(8).len(), 6);
        assert_eq!(bitonic_schedule(256).len(), 36);
    }

    #[test]
    fn test_schedule_strides_halve_within_stage() {
        let passes = bitonic_schedule(8);
        let strides: Vec<(u32, u32)> = passes.iter().map(|p| (p.stage, p.stride)).collect();
        assert_eq!(strides, vec![(0, 1), (1, 2), (1, 1), (2, 4), (2, 2), (2, 1)]);
        for p in &passes {
            assert_eq!(p.block, 2 << p.stage);
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_schedule_rejects_non_power_of_two() {
        bitonic_schedule(12);
    }

    #[test]
    fn test_pair_first_index_covers_every_element_once() {
        for stride in [1u32, 2, 4, 8] {
            let n = 16u32;
            let mut seen = vec![false; n as usize];
            for pair in 0..n / 2 {
                let i = pair_first_index(pair, stride);
                let j = i ^ stride;
                assert_eq!(j, i + stride);
                assert!(!seen[i as usize] && !seen[j as usize]);
                seen[i as usize] = true;
                seen[j as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_bitonic_sort_matches_std_sort() {
        let mut data: Vec<f32> = (0..64).map(|i| ((i * 37 + 11) % 64) as f32 - 20.5).collect();
        let mut expected = data.clone();
        expected.sort_by(f32::total_cmp);
        bitonic_sort_in_place(&mut data);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_bitonic_sort_sentinels_settle_at_tail() {
        let mut data = vec![3.0, f32::INFINITY, 1.0, f32::INFINITY, 2.0, f32::INFINITY, 0.5, 9.0];
        bitonic_sort_in_place(&mut data);
        assert_eq!(&data[..5], &[0.5, 1.0, 2.0, 3.0, 9.0]);
        assert!(data[5..].iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_median_index_upper_middle() {
        assert_eq!(median_index(5), 2);
        assert_eq!(median_index(4), 2);
        assert_eq!(median_index(128), 64);
        assert_eq!(median_index(1), 0);
    }

    #[test]
    fn test_sort_lanes_vertical_small() {
        let img = Image::from_vec(3, 2, vec![3.0f32, 1.0, 1.0, 2.0, 2.0, 0.0]);
        let sorted = sort_lanes(&img, Axis::Vertical);
        assert_eq!(sorted.column(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(sorted.column(1), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_median_lanes_even_length_takes_upper_middle() {
        // Row [4, 1, 3, 2] sorts to [1, 2, 3, 4]; index 2 → 3, not 2.5.
        let img = Image::from_vec(1, 4, vec![4u16, 1, 3, 2]);
        assert_eq!(median_lanes(&img, Axis::Horizontal), vec![3.0]);
    }

    #[test]
    fn test_host_separator_shape_guard() {
        let sep = HostSeparator::new(4, 3).unwrap();
        let wrong: Image<f32> = Image::new(5, 3);
        let err = sep.filter_vertical(&wrong).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch { expected: (4, 3), actual: (5, 3) }
        ));
        assert!(matches!(HostSeparator::new(0, 3), Err(Error::EmptyShape { .. })));
    }
}
