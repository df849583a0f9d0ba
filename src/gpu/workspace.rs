// gpu/workspace.rs — Device buffers, padded lane layout, upload/readback.
//
// LOGICAL VS PHYSICAL LENGTH
// ──────────────────────────
// The bitonic network needs power-of-two lanes. A `LaneLayout` carries both
// lengths for one axis of one (rows, cols) shape:
//
//   true_len   — samples per lane the caller sees (rows or cols)
//   padded_len — true_len.next_power_of_two(), what the device sorts
//
// Slots in [true_len, padded_len) hold +inf. Ascending order parks them at
// the tail of every lane, so the first true_len sorted elements are exactly
// the sorted input. They are stripped on readback and never reach callers.
//
// AXIS ADDRESSING
// ───────────────
// Both axes use one kernel. Element `pos` of lane `lane` lives at
//
//   lane * lane_stride + pos * elem_stride
//
//   Vertical   (lanes = columns): buffer is (padded_rows, cols) row-major
//              lane_stride = 1, elem_stride = cols
//   Horizontal (lanes = rows):    buffer is (rows, padded_cols) row-major
//              lane_stride = padded_cols, elem_stride = 1
//
// The vertical layout keeps the input's row-major order, so the first
// rows*cols elements of the sorted buffer are already the result and the
// sentinel rows are simply not copied back. The horizontal layout pads the
// end of every row and needs a per-row strip, like the alignment strip in
// a texture readback.
//
// BUFFERS
// ───────
//   data    — STORAGE | COPY_SRC | COPY_DST, lanes × padded_len f32
//   medians — STORAGE | COPY_SRC, one f32 per lane
//   staging — MAP_READ | COPY_DST, large enough for either readback
//
// `ensure_capacity` only ever grows them. Each growth bumps `generation`,
// which tells the bind-group owners (gpu/bitonic.rs) to rebuild.

use crate::error::{Error, Result};
use crate::gpu::device::GpuDevice;
use crate::image::{Image, Pixel};
use crate::sort::{padded_len, Axis};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

// ---------------------------------------------------------------------------
// LaneLayout
// ---------------------------------------------------------------------------

/// Logical/physical description of the padded working array for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLayout {
    pub axis: Axis,
    pub rows: usize,
    pub cols: usize,
    /// Number of independent lanes.
    pub lanes: usize,
    /// Samples per lane as seen by the caller.
    pub true_len: usize,
    /// Next power of two ≥ `true_len`.
    pub padded_len: usize,
    pub lane_stride: usize,
    pub elem_stride: usize,
}

impl LaneLayout {
    pub fn for_axis(rows: usize, cols: usize, axis: Axis) -> Self {
        let lanes = axis.lane_count(rows, cols);
        let true_len = axis.lane_len(rows, cols);
        let padded = padded_len(true_len);
        let (lane_stride, elem_stride) = match axis {
            Axis::Vertical => (1, cols),
            Axis::Horizontal => (padded, 1),
        };
        LaneLayout {
            axis,
            rows,
            cols,
            lanes,
            true_len,
            padded_len: padded,
            lane_stride,
            elem_stride,
        }
    }

    /// Elements in the padded working array.
    pub fn physical_len(&self) -> usize {
        self.lanes * self.padded_len
    }

    /// Flat buffer index of element `pos` of lane `lane`.
    #[inline]
    pub fn index(&self, lane: usize, pos: usize) -> usize {
        lane * self.lane_stride + pos * self.elem_stride
    }

    /// Elements that must be copied back to recover the sorted array.
    /// Vertical: only the leading `rows` rows. Horizontal: everything.
    pub fn readback_len(&self) -> usize {
        match self.axis {
            Axis::Vertical => self.rows * self.cols,
            Axis::Horizontal => self.physical_len(),
        }
    }

    /// Reject layouts whose padded array cannot be bound on the device.
    pub fn validate(&self, max_storage_bytes: u64) -> Result<()> {
        let bytes = self.physical_len() as u64 * F32_BYTES;
        if bytes > max_storage_bytes || self.physical_len() as u64 > u32::MAX as u64 {
            return Err(Error::LaneTooLong {
                len: self.physical_len() as u64,
                max: max_storage_bytes / F32_BYTES,
            });
        }
        Ok(())
    }
}

/// Build the padded working array for `src` on the host.
pub fn pad_lanes<T: Pixel>(src: &Image<T>, layout: &LaneLayout) -> Vec<f32> {
    let mut out = vec![f32::INFINITY; layout.physical_len()];
    match layout.axis {
        // Row-major order is preserved; sentinel rows follow the real ones.
        Axis::Vertical => {
            for (dst, v) in out.iter_mut().zip(src.as_slice()) {
                *dst = v.to_f32();
            }
        }
        Axis::Horizontal => {
            for r in 0..layout.rows {
                let start = r * layout.padded_len;
                for (dst, v) in out[start..start + layout.cols].iter_mut().zip(src.row(r)) {
                    *dst = v.to_f32();
                }
            }
        }
    }
    out
}

/// Recover the caller-visible `(rows, cols)` array from a readback of
/// `layout.readback_len()` elements.
pub fn strip_padding(readback: &[f32], layout: &LaneLayout) -> Image<f32> {
    match layout.axis {
        Axis::Vertical => {
            Image::from_vec(layout.rows, layout.cols, readback[..layout.rows * layout.cols].to_vec())
        }
        Axis::Horizontal => Image::from_fn(layout.rows, layout.cols, |r, c| {
            readback[r * layout.padded_len + c]
        }),
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

struct Buffers {
    data: wgpu::Buffer,
    medians: wgpu::Buffer,
    staging: wgpu::Buffer,
}

/// Device buffers shared by both axes of one separator.
pub struct Workspace {
    buffers: Option<Buffers>,
    /// Capacity of `data` in f32 elements.
    elems: usize,
    /// Capacity of `medians` in lanes.
    lanes: usize,
    generation: u64,
}

impl Workspace {
    /// An empty workspace. Nothing is allocated until `ensure_capacity`.
    pub fn new() -> Self {
        Workspace { buffers: None, elems: 0, lanes: 0, generation: 0 }
    }

    /// Grow the buffers so that `lanes` lanes of `padded_len` fit.
    ///
    /// Returns `true` if anything was (re)allocated. Requests that already
    /// fit are a no-op.
    pub fn ensure_capacity(&mut self, gpu: &GpuDevice, padded_len: usize, lanes: usize) -> bool {
        let need_elems = padded_len * lanes;
        if self.buffers.is_some() && need_elems <= self.elems && lanes <= self.lanes {
            return false;
        }
        let elems = need_elems.max(self.elems);
        let lanes = lanes.max(self.lanes);
        log::debug!(
            "workspace: allocating {} KiB working storage, {} median lanes",
            elems as u64 * F32_BYTES / 1024,
            lanes
        );

        let data = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Workspace::data"),
            size: elems as u64 * F32_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let medians = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Workspace::medians"),
            size: lanes as u64 * F32_BYTES,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        // The largest readback is a full data buffer; medians are smaller.
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Workspace::staging"),
            size: elems.max(lanes) as u64 * F32_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.buffers = Some(Buffers { data, medians, staging });
        self.elems = elems;
        self.lanes = lanes;
        self.generation += 1;
        true
    }

    /// Bumped on every reallocation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn data_buffer(&self) -> Result<&wgpu::Buffer> {
        Ok(&self.buffers()?.data)
    }

    pub fn median_buffer(&self) -> Result<&wgpu::Buffer> {
        Ok(&self.buffers()?.medians)
    }

    /// Convert, pad and queue `src` for upload into the data buffer.
    ///
    /// `queue.write_buffer` is staged by wgpu and executes before the next
    /// submission, so the sort recorded afterwards sees the new data.
    pub fn upload<T: Pixel>(&self, gpu: &GpuDevice, src: &Image<T>, layout: &LaneLayout) -> Result<()> {
        let padded = pad_lanes(src, layout);
        gpu.queue.write_buffer(&self.buffers()?.data, 0, bytemuck::cast_slice(&padded));
        Ok(())
    }

    /// Record a copy of the first `len` elements of the data buffer into
    /// the staging buffer.
    pub fn encode_data_readback(&self, encoder: &mut wgpu::CommandEncoder, len: usize) -> Result<()> {
        let b = self.buffers()?;
        encoder.copy_buffer_to_buffer(&b.data, 0, &b.staging, 0, len as u64 * F32_BYTES);
        Ok(())
    }

    /// Record a copy of the first `len` median lanes into the staging buffer.
    pub fn encode_median_readback(&self, encoder: &mut wgpu::CommandEncoder, len: usize) -> Result<()> {
        let b = self.buffers()?;
        encoder.copy_buffer_to_buffer(&b.medians, 0, &b.staging, 0, len as u64 * F32_BYTES);
        Ok(())
    }

    /// Block until the queue drains, then copy `len` f32 values out of the
    /// staging buffer.
    ///
    /// Any driver error recorded while the queued work ran is reported here
    /// as `DeviceExecutionFailure`.
    pub fn read_staging(&self, gpu: &GpuDevice, len: usize) -> Result<Vec<f32>> {
        let staging = &self.buffers()?.staging;
        let slice = staging.slice(..len as u64 * F32_BYTES);

        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver outlives the poll below; a failed send only
            // means the caller already gave up.
            let _ = tx.send(r);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        if let Some(e) = gpu.take_error() {
            // The map may still have succeeded; leave the buffer reusable.
            if let Ok(Ok(())) = rx.try_recv() {
                staging.unmap();
            }
            return Err(Error::DeviceExecutionFailure(e));
        }
        rx.recv()
            .map_err(|_| Error::DeviceExecutionFailure("readback callback never fired".into()))??;

        let out = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&mapped[..]).to_vec()
        };
        staging.unmap();
        Ok(out)
    }

    fn buffers(&self) -> Result<&Buffers> {
        self.buffers.as_ref().ok_or_else(|| {
            Error::DeviceExecutionFailure("workspace used before ensure_capacity".into())
        })
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_vertical_non_power_of_two() {
        let l = LaneLayout::for_axis(100, 7, Axis::Vertical);
        assert_eq!(l.lanes, 7);
        assert_eq!(l.true_len, 100);
        assert_eq!(l.padded_len, 128);
        assert_eq!(l.physical_len(), 7 * 128);
        assert_eq!(l.index(3, 2), 2 * 7 + 3);
        assert_eq!(l.readback_len(), 700);
    }

    #[test]
    fn test_layout_horizontal_exact_power_of_two() {
        let l = LaneLayout::for_axis(5, 256, Axis::Horizontal);
        assert_eq!(l.lanes, 5);
        assert_eq!(l.padded_len, 256);
        assert_eq!(l.index(2, 10), 2 * 256 + 10);
        assert_eq!(l.readback_len(), 5 * 256);
    }

    #[test]
    fn test_validate_rejects_oversized_layout() {
        let l = LaneLayout::for_axis(1000, 1000, Axis::Vertical);
        assert!(l.validate(1 << 30).is_ok());
        let err = l.validate(1024).unwrap_err();
        assert!(matches!(err, Error::LaneTooLong { len, .. } if len == 1024 * 1000));
    }

    #[test]
    fn test_pad_lanes_vertical_appends_sentinel_rows() {
        // 3×2 → padded rows 4.
        let img = Image::from_vec(3, 2, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let l = LaneLayout::for_axis(3, 2, Axis::Vertical);
        let p = pad_lanes(&img, &l);
        assert_eq!(&p[..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(p.len(), 8);
        assert!(p[6..].iter().all(|v| *v == f32::INFINITY));
    }

    #[test]
    fn test_pad_lanes_horizontal_pads_each_row() {
        let img = Image::from_vec(2, 3, vec![1u16, 2, 3, 4, 5, 6]);
        let l = LaneLayout::for_axis(2, 3, Axis::Horizontal);
        let p = pad_lanes(&img, &l);
        assert_eq!(p, vec![1.0, 2.0, 3.0, f32::INFINITY, 4.0, 5.0, 6.0, f32::INFINITY]);
    }

    #[test]
    fn test_strip_padding_inverts_pad() {
        let img = Image::from_fn(3, 5, |r, c| (r * 5 + c) as f32);
        for axis in [Axis::Vertical, Axis::Horizontal] {
            let l = LaneLayout::for_axis(3, 5, axis);
            let p = pad_lanes(&img, &l);
            let back = strip_padding(&p[..l.readback_len()], &l);
            assert_eq!(back, img, "axis {axis:?}");
        }
    }
}
