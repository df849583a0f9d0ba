// gpu/separator.rs — Public facade: sort / median-filter 2D arrays on the GPU.
//
// TWO-PHASE RESULTS
// ─────────────────
// Every operation enqueues work and returns immediately with a handle:
//
//   let mut sep = Separator::new(rows, cols, false)?;
//   let medians = sep.filter_vertical(&frame)?.get()?;
//   //            └── dispatch (no wait) ──┘ └ blocking readback
//
// `DeviceArray` / `DeviceVector` borrow the separator mutably. The borrow
// checker therefore guarantees a handle is gone before the next call
// reuses the workspace, and that one separator is never driven from two
// threads at once.
//
// WHAT HAPPENS PER CALL
// ─────────────────────
//   1. shape check          — ShapeMismatch, nothing uploaded
//   2. upload               — f32 conversion + sentinel padding, write_buffer
//   3. sort                 — all bitonic passes in one encoder
//   4. extract (filters)    — median lane into the median buffer
//   5. submit               — single queue submission
//   6. get()                — copy to staging, poll(Wait), map, strip
//
// Driver errors raised while 2–5 run are collected by the device's
// uncaptured-error hook and reported by get() as DeviceExecutionFailure.

use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::gpu::bitonic::{AxisPlan, BitonicPipeline, EXTRACT_WG_SIZE};
use crate::gpu::device::GpuDevice;
use crate::gpu::workspace::{strip_padding, LaneLayout, Workspace};
use crate::image::{Image, Pixel};
use crate::profile::{ProfileReport, Profiler};
use crate::sort::{check_shape, Axis};

/// GPU lane sorter and median filter bound to one `(rows, cols)` shape.
pub struct Separator {
    gpu: Arc<GpuDevice>,
    rows: usize,
    cols: usize,
    pipeline: BitonicPipeline,
    workspace: Workspace,
    vertical: AxisPlan,
    horizontal: AxisPlan,
    profiler: Profiler,
}

impl Separator {
    /// Acquire a device and build a separator for `(rows, cols)`.
    ///
    /// # Errors
    /// `NoDeviceAvailable` when no accelerator can be acquired, so callers
    /// can switch to `HostSeparator` before doing any work.
    pub fn new(rows: usize, cols: usize, profiling: bool) -> Result<Self> {
        let gpu = Arc::new(GpuDevice::acquire()?);
        Self::with_device(gpu, rows, cols, profiling)
    }

    /// Build a separator on an existing, possibly shared, device.
    pub fn with_device(gpu: Arc<GpuDevice>, rows: usize, cols: usize, profiling: bool) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyShape { rows, cols });
        }
        let v_layout = LaneLayout::for_axis(rows, cols, Axis::Vertical);
        let h_layout = LaneLayout::for_axis(rows, cols, Axis::Horizontal);
        for layout in [&v_layout, &h_layout] {
            check_layout_fits(&gpu, layout)?;
        }

        let pipeline = BitonicPipeline::new(&gpu);
        let mut workspace = Workspace::new();
        for layout in [&v_layout, &h_layout] {
            workspace.ensure_capacity(&gpu, layout.padded_len, layout.lanes);
        }
        let vertical = pipeline.build_plan(&gpu, &workspace, v_layout)?;
        let horizontal = pipeline.build_plan(&gpu, &workspace, h_layout)?;

        log::debug!(
            "separator {rows}×{cols} on {}: {} vertical / {} horizontal passes",
            gpu.adapter_info,
            vertical.pass_count(),
            horizontal.pass_count()
        );

        Ok(Separator {
            gpu,
            rows,
            cols,
            pipeline,
            workspace,
            vertical,
            horizontal,
            profiler: Profiler::new(profiling),
        })
    }

    /// `(rows, cols)` declared at construction.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// The device this separator dispatches to.
    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Sort down every column, ascending.
    pub fn sort_vertical<T: Pixel>(&mut self, src: &Image<T>) -> Result<DeviceArray<'_>> {
        self.dispatch(src, Axis::Vertical, false, "sort_vertical")?;
        Ok(DeviceArray { sep: self, axis: Axis::Vertical })
    }

    /// Sort across every row, ascending.
    pub fn sort_horizontal<T: Pixel>(&mut self, src: &Image<T>) -> Result<DeviceArray<'_>> {
        self.dispatch(src, Axis::Horizontal, false, "sort_horizontal")?;
        Ok(DeviceArray { sep: self, axis: Axis::Horizontal })
    }

    /// Median of every column (length `cols`).
    pub fn filter_vertical<T: Pixel>(&mut self, src: &Image<T>) -> Result<DeviceVector<'_>> {
        self.dispatch(src, Axis::Vertical, true, "filter_vertical")?;
        Ok(DeviceVector { sep: self, axis: Axis::Vertical })
    }

    /// Median of every row (length `rows`).
    pub fn filter_horizontal<T: Pixel>(&mut self, src: &Image<T>) -> Result<DeviceVector<'_>> {
        self.dispatch(src, Axis::Horizontal, true, "filter_horizontal")?;
        Ok(DeviceVector { sep: self, axis: Axis::Horizontal })
    }

    // -----------------------------------------------------------------------
    // Profiling
    // -----------------------------------------------------------------------

    /// Aggregate timing since the last reset, also written to the log.
    pub fn log_profile(&self) -> ProfileReport {
        let report = self.profiler.report();
        if self.profiler.is_enabled() {
            log::info!("separator {}×{} profile:\n{report}", self.rows, self.cols);
        }
        report
    }

    /// Clear accumulated timing. Shape and buffers are untouched.
    pub fn reset_timer(&mut self) {
        self.profiler.reset();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn plan(&self, axis: Axis) -> &AxisPlan {
        match axis {
            Axis::Vertical => &self.vertical,
            Axis::Horizontal => &self.horizontal,
        }
    }

    /// Rebuild a plan whose bind groups refer to replaced buffers.
    fn refresh_plan(&mut self, axis: Axis) -> Result<()> {
        let layout = self.plan(axis).layout;
        self.workspace.ensure_capacity(&self.gpu, layout.padded_len, layout.lanes);
        if self.plan(axis).is_current(&self.workspace) {
            return Ok(());
        }
        let plan = self.pipeline.build_plan(&self.gpu, &self.workspace, layout)?;
        match axis {
            Axis::Vertical => self.vertical = plan,
            Axis::Horizontal => self.horizontal = plan,
        }
        Ok(())
    }

    fn dispatch<T: Pixel>(&mut self, src: &Image<T>, axis: Axis, median: bool, op: &'static str) -> Result<()> {
        check_shape((self.rows, self.cols), src.shape())?;
        self.refresh_plan(axis)?;

        let t0 = Instant::now();
        let plan = self.plan(axis);
        self.workspace.upload(&self.gpu, src, &plan.layout)?;
        let t_upload = t0.elapsed();

        let t0 = Instant::now();
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(op),
        });
        self.pipeline.encode_sort(&mut encoder, plan);
        if median {
            self.pipeline.encode_extract(&mut encoder, plan);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        let t_enqueue = t0.elapsed();

        self.profiler.record("upload", t_upload);
        self.profiler.record(op, t_enqueue);
        Ok(())
    }

    /// Copy `len` elements from the data or median buffer to the host.
    fn download(&mut self, from_medians: bool, len: usize) -> Result<Vec<f32>> {
        let t0 = Instant::now();
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Separator::download"),
        });
        if from_medians {
            self.workspace.encode_median_readback(&mut encoder, len)?;
        } else {
            self.workspace.encode_data_readback(&mut encoder, len)?;
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        let out = self.workspace.read_staging(&self.gpu, len);
        self.profiler.record("download", t0.elapsed());
        out
    }
}

/// Fail construction before any allocation if a layout cannot be bound
/// (`LaneTooLong`) or dispatched (`GridTooLarge`).
fn check_layout_fits(gpu: &GpuDevice, layout: &LaneLayout) -> Result<()> {
    layout.validate(gpu.max_storage_bytes())?;
    gpu.sort_grid(layout.lanes, layout.padded_len / 2)?;
    gpu.lane_grid(layout.lanes, EXTRACT_WG_SIZE)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Device result handles
// ---------------------------------------------------------------------------

/// A sorted `(rows, cols)` array resident on the device.
pub struct DeviceArray<'a> {
    sep: &'a mut Separator,
    axis: Axis,
}

impl DeviceArray<'_> {
    pub fn shape(&self) -> (usize, usize) {
        self.sep.shape()
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Block until the sort has finished and copy it to the host.
    ///
    /// Sentinel padding is stripped; the result has the declared shape.
    pub fn get(&mut self) -> Result<Image<f32>> {
        let layout = self.sep.plan(self.axis).layout;
        let raw = self.sep.download(false, layout.readback_len())?;
        Ok(strip_padding(&raw, &layout))
    }
}

/// One value per lane (the lane medians) resident on the device.
pub struct DeviceVector<'a> {
    sep: &'a mut Separator,
    axis: Axis,
}

impl DeviceVector<'_> {
    /// Number of lanes: `cols` for vertical, `rows` for horizontal.
    pub fn len(&self) -> usize {
        self.sep.plan(self.axis).layout.lanes
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Block until the filter has finished and copy the vector to the host.
    pub fn get(&mut self) -> Result<Vec<f32>> {
        let len = self.len();
        self.sep.download(true, len)
    }
}
