// image.rs — Runtime-sized 2D sample grid, generic over sample type.
//
// Every operation in this crate takes its input as an `Image<T>`: a dense,
// row-major grid of detector samples with shape (rows, cols). The same
// container is returned when a sorted array is materialized from the GPU.
//
// Memory layout (rows = 3, cols = 4):
//
//   data index:  0  1  2  3  4  5  6  7  8  9 10 11
//   sample:      ■  ■  ■  ■  ■  ■  ■  ■  ■  ■  ■  ■
//   row:         |-- row 0 --| |-- row 1 --| |-- row 2 --|
//
// Unlike a GPU staging buffer there is no row padding here: the padded,
// power-of-two working layout lives only on the device (see
// gpu/workspace.rs) and is stripped again on readback.
//
// A "lane" is either one column (vertical sort) or one row (horizontal
// sort). `column()` and `row()` give host-side access to a single lane,
// which is what the reference implementation in sort.rs iterates over.

use std::fmt;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Pixel Trait
// ---------------------------------------------------------------------------
// Detector frames arrive as u16 counts, u32 accumulations, or already
// calibrated floats. The device works in f32 only, so every sample type
// must convert to f32 on upload. `from_f32` is used when a median frame is
// written back into the caller's native type.

/// Trait for types that can be stored in an [`Image`].
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Convert the sample to the f32 working type.
    fn to_f32(self) -> f32;

    /// Construct a sample from an f32 value (with clamping/rounding for
    /// integer types).
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 65535.0).round() as u16
    }
}

impl Pixel for u32 {
    // Counts above 2^24 lose precision in f32. Integrating detectors rarely
    // get there per frame; accumulated sums should be pre-scaled.
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.max(0.0).round() as u32
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Pixel for f64 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as f64
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A dense 2D grid of samples with runtime shape `(rows, cols)`.
pub struct Image<T: Pixel> {
    /// Samples in row-major order. Length = rows * cols.
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

// Manual Clone: a deep copy of heap data, spelled out on purpose.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl<T: Pixel> Image<T> {
    // --- Constructors ---

    /// Create a zero-initialized image.
    pub fn new(rows: usize, cols: usize) -> Self {
        Image {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
        }
    }

    /// Create an image from a row-major sample vector.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`. Use [`Image::try_from_vec`]
    /// when the length comes from outside the program.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data length ({}) must equal rows * cols ({})",
            data.len(),
            rows * cols,
        );
        Image { data, rows, cols }
    }

    /// Fallible variant of [`Image::from_vec`].
    ///
    /// The `actual` shape reported on mismatch is `(1, data.len())` since a
    /// flat vector has no row structure of its own.
    pub fn try_from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ShapeMismatch {
                expected: (rows, cols),
                actual: (1, data.len()),
            });
        }
        Ok(Image { data, rows, cols })
    }

    /// Build an image by evaluating `f(row, col)` for every position.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Image { data, rows, cols }
    }

    // --- Accessors ---

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Get the sample at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the position is out of bounds.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.bounds_check(row, col);
        self.data[row * self.cols + col]
    }

    /// Set the sample at `(row, col)`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.bounds_check(row, col);
        self.data[row * self.cols + col] = value;
    }

    /// Borrow one row as a slice (a horizontal lane).
    #[inline]
    pub fn row(&self, r: usize) -> &[T] {
        assert!(r < self.rows, "row {r} out of bounds (rows {})", self.rows);
        let start = r * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Copy one column out (a vertical lane). Columns are strided in memory,
    /// so unlike `row()` this has to allocate.
    pub fn column(&self, c: usize) -> Vec<T> {
        assert!(c < self.cols, "column {c} out of bounds (cols {})", self.cols);
        self.data.iter().skip(c).step_by(self.cols).copied().collect()
    }

    /// Return the transposed image, shape `(cols, rows)`.
    pub fn transpose(&self) -> Image<T> {
        Image::from_fn(self.cols, self.rows, |r, c| self.data[c * self.cols + r])
    }

    /// Flat row-major view of all samples.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn bounds_check(&self, row: usize, col: usize) {
        assert!(
            row < self.rows && col < self.cols,
            "sample ({row},{col}) out of bounds for image {}×{}",
            self.rows,
            self.cols,
        );
    }
}

impl<T: Pixel + PartialEq> PartialEq for Image<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.cols == other.cols && self.data == other.data
    }
}

// Debug formatting — prints every sample for small images, a summary
// otherwise.
impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image<{}×{}>", self.rows, self.cols)?;
        if self.rows * self.cols > 256 {
            return writeln!(f, "  ({} samples)", self.data.len());
        }
        for r in 0..self.rows {
            write!(f, "  ")?;
            for v in self.row(r) {
                write!(f, "{v:?} ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_is_strided_copy() {
        let img = Image::from_vec(3, 2, vec![1u16, 2, 3, 4, 5, 6]);
        assert_eq!(img.column(0), vec![1, 3, 5]);
        assert_eq!(img.column(1), vec![2, 4, 6]);
        assert_eq!(img.row(1), &[3, 4]);
    }

    #[test]
    fn test_transpose_swaps_shape() {
        let img = Image::from_fn(2, 3, |r, c| (r * 10 + c) as f32);
        let t = img.transpose();
        assert_eq!(t.shape(), (3, 2));
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(img.get(r, c), t.get(c, r));
            }
        }
    }

    #[test]
    fn test_try_from_vec_rejects_bad_length() {
        let err = Image::try_from_vec(2, 2, vec![0.0f32; 3]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: (2, 2), .. }));
    }

    #[test]
    fn test_pixel_clamping() {
        assert_eq!(u8::from_f32(300.0), 255);
        assert_eq!(u16::from_f32(-4.0), 0);
        assert_eq!(u16::from_f32(12.6), 13);
        assert_eq!(u32::from_f32(7.4), 7);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds_panics() {
        let img: Image<f32> = Image::new(2, 2);
        img.get(2, 0);
    }
}
