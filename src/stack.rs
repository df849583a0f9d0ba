// stack.rs — Frame stack ↔ lane array reshaping.
//
// Per-pixel median across N frames is a vertical filter on an (N, h*w)
// array: row n holds frame n flattened, column p holds the N observations
// of pixel p. `stack_frames` builds that array; `unstack_pixels` turns the
// resulting median vector back into an (h, w) frame.

use crate::error::{Error, Result};
use crate::image::{Image, Pixel};

/// Flatten `frames` (all of shape (h, w)) into an `(frames.len(), h*w)`
/// array, converting samples to f32.
pub fn stack_frames<T: Pixel>(frames: &[Image<T>]) -> Result<Image<f32>> {
    let first = frames.first().ok_or(Error::EmptyStack)?;
    let expected = first.shape();
    let pixels = expected.0 * expected.1;

    let mut data = Vec::with_capacity(frames.len() * pixels);
    for (index, frame) in frames.iter().enumerate() {
        if frame.shape() != expected {
            return Err(Error::FrameShapeMismatch { index, expected, actual: frame.shape() });
        }
        data.extend(frame.as_slice().iter().map(|v| v.to_f32()));
    }
    Ok(Image::from_vec(frames.len(), pixels, data))
}

/// Reshape a per-pixel vector (length h*w) into an (h, w) frame.
pub fn unstack_pixels(values: &[f32], height: usize, width: usize) -> Result<Image<f32>> {
    Image::try_from_vec(height, width, values.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{median_lanes, Axis};

    #[test]
    fn test_stack_then_vertical_median_is_per_pixel_median() {
        // Three 2×2 frames; pixel (0,1) has a cosmic-ray hit in frame 1.
        let frames = vec![
            Image::from_vec(2, 2, vec![10u16, 20, 30, 40]),
            Image::from_vec(2, 2, vec![11u16, 9000, 29, 41]),
            Image::from_vec(2, 2, vec![12u16, 21, 31, 39]),
        ];
        let stacked = stack_frames(&frames).unwrap();
        assert_eq!(stacked.shape(), (3, 4));

        let med = median_lanes(&stacked, Axis::Vertical);
        let frame = unstack_pixels(&med, 2, 2).unwrap();
        assert_eq!(frame.as_slice(), &[11.0, 21.0, 30.0, 40.0]);
    }

    #[test]
    fn test_stack_rejects_mismatched_frame() {
        let frames = vec![Image::<f32>::new(2, 2), Image::<f32>::new(2, 3)];
        let err = stack_frames(&frames).unwrap_err();
        assert!(matches!(err, Error::FrameShapeMismatch { index: 1, .. }));
        assert!(matches!(stack_frames::<f32>(&[]), Err(Error::EmptyStack)));
    }
}
