// gpu/bitonic.rs — GPU bitonic lane sort and median extraction.
//
// PIPELINE LIFETIME
// ─────────────────
// `BitonicPipeline` compiles both shaders once. An `AxisPlan` holds
// everything that depends on the shape and axis but not on the input data:
// one uniform buffer + bind group per network pass, and the extraction
// bind group. Plans are built when a separator is constructed and reused by
// every call; only the data upload changes between calls.
//
//   let pipeline = BitonicPipeline::new(&gpu);
//   let plan = pipeline.build_plan(&gpu, &workspace, layout)?;
//   loop {
//       workspace.upload(&gpu, &frame, &plan.layout)?;
//       pipeline.encode_sort(&mut encoder, &plan);
//       pipeline.encode_extract(&mut encoder, &plan);   // filters only
//   }
//
// PASS ORDERING
// ─────────────
// Every network pass gets its own compute pass in the same encoder. wgpu
// orders compute passes recorded into one encoder and makes storage writes
// of one pass visible to the next, which gives exactly the sequential
// (stage, stride) order of `sort::bitonic_schedule`.
//
// DISPATCH SHAPE
// ──────────────
// x over lanes, y over pairs (padded_len / 2). Lanes are independent, so all
// of them advance through the same pass concurrently. A (N, h*w) frame
// stack has millions of lanes, more than one grid dimension holds; the
// `DispatchGrid` folds the overflow into z and the shader unfolds it.

use wgpu::util::DeviceExt;

use crate::error::Result;
use crate::gpu::device::{DispatchGrid, GpuDevice};
use crate::gpu::workspace::{LaneLayout, Workspace};
use crate::sort::{bitonic_schedule, median_index, BitonicPass};

/// 1-D workgroup size for the extraction kernel.
pub const EXTRACT_WG_SIZE: u32 = 64;

// ---------------------------------------------------------------------------
// Uniform params (must match the WGSL structs exactly)
// ---------------------------------------------------------------------------

/// Layout must match `SortParams` in `bitonic.wgsl` (12 × u32 = 48 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct SortParams {
    lanes: u32,
    padded_len: u32,
    lane_stride: u32,
    elem_stride: u32,
    block: u32,
    stride: u32,
    lane_span: u32,
    pair_span: u32,
    lane_slices: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

impl SortParams {
    fn new(layout: &LaneLayout, pass: &BitonicPass, grid: &DispatchGrid) -> Self {
        SortParams {
            lanes: layout.lanes as u32,
            padded_len: layout.padded_len as u32,
            lane_stride: layout.lane_stride as u32,
            elem_stride: layout.elem_stride as u32,
            block: pass.block,
            stride: pass.stride,
            lane_span: grid.lane_span,
            pair_span: grid.pair_span,
            lane_slices: grid.lane_slices,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        }
    }
}

/// Layout must match `ExtractParams` in `extract.wgsl` (8 × u32 = 32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct ExtractParams {
    lanes: u32,
    lane_stride: u32,
    elem_stride: u32,
    position: u32,
    lane_span: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

impl ExtractParams {
    fn median(layout: &LaneLayout, grid: &DispatchGrid) -> Self {
        ExtractParams {
            lanes: layout.lanes as u32,
            lane_stride: layout.lane_stride as u32,
            elem_stride: layout.elem_stride as u32,
            position: median_index(layout.true_len) as u32,
            lane_span: grid.lane_span,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// AxisPlan
// ---------------------------------------------------------------------------

/// Pre-built bind groups for sorting one axis of one shape.
pub struct AxisPlan {
    pub layout: LaneLayout,
    passes: Vec<wgpu::BindGroup>,
    sort_grid: DispatchGrid,
    extract: wgpu::BindGroup,
    extract_grid: DispatchGrid,
    /// Workspace generation the bind groups point into.
    generation: u64,
    // Bind groups keep their resources alive; holding the buffers as well
    // makes ownership explicit.
    _uniforms: Vec<wgpu::Buffer>,
}

impl AxisPlan {
    /// Number of compare-exchange passes this plan dispatches.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Whether the bind groups still point at the workspace's buffers.
    pub fn is_current(&self, workspace: &Workspace) -> bool {
        self.generation == workspace.generation()
    }
}

// ---------------------------------------------------------------------------
// BitonicPipeline
// ---------------------------------------------------------------------------

/// Compiled compare-exchange and extraction pipelines.
pub struct BitonicPipeline {
    sort_pipeline: wgpu::ComputePipeline,
    sort_bgl: wgpu::BindGroupLayout,
    extract_pipeline: wgpu::ComputePipeline,
    extract_bgl: wgpu::BindGroupLayout,
}

impl BitonicPipeline {
    pub fn new(gpu: &GpuDevice) -> Self {
        let mut sort_src = include_str!("../shaders/bitonic.wgsl").to_string();
        for (token, value) in gpu.workgroup_size().as_substitutions() {
            sort_src = sort_src.replace(token, &value);
        }
        let extract_src = include_str!("../shaders/extract.wgsl")
            .replace("{{WG_1D}}", &EXTRACT_WG_SIZE.to_string());

        let sort_shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("bitonic.wgsl"),
            source: wgpu::ShaderSource::Wgsl(sort_src.into()),
        });
        let extract_shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("extract.wgsl"),
            source: wgpu::ShaderSource::Wgsl(extract_src.into()),
        });

        let sort_bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bitonic BGL"),
            entries: &[
                // 0 — working array (storage read_write)
                storage_entry(0, false),
                // 1 — pass params uniform
                uniform_entry(1),
            ],
        });
        let extract_bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Extract BGL"),
            entries: &[
                // 0 — sorted working array (storage read)
                storage_entry(0, true),
                // 1 — per-lane output (storage read_write)
                storage_entry(1, false),
                // 2 — extract params uniform
                uniform_entry(2),
            ],
        });

        let sort_pipeline = create_pipeline(gpu, &sort_bgl, &sort_shader, "compare_exchange");
        let extract_pipeline = create_pipeline(gpu, &extract_bgl, &extract_shader, "extract_lane");

        BitonicPipeline { sort_pipeline, sort_bgl, extract_pipeline, extract_bgl }
    }

    /// Build uniforms and bind groups for every pass of `layout`.
    pub fn build_plan(&self, gpu: &GpuDevice, workspace: &Workspace, layout: LaneLayout) -> Result<AxisPlan> {
        let data = workspace.data_buffer()?;
        let medians = workspace.median_buffer()?;
        let sort_grid = gpu.sort_grid(layout.lanes, layout.padded_len / 2)?;
        let extract_grid = gpu.lane_grid(layout.lanes, EXTRACT_WG_SIZE)?;

        let schedule = bitonic_schedule(layout.padded_len as u32);
        let mut uniforms = Vec::with_capacity(schedule.len() + 1);
        let mut passes = Vec::with_capacity(schedule.len());

        for pass in &schedule {
            let params = SortParams::new(&layout, pass, &sort_grid);
            let buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("SortParams"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            passes.push(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("bitonic pass BG"),
                layout: &self.sort_bgl,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: data.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: buf.as_entire_binding() },
                ],
            }));
            uniforms.push(buf);
        }

        let params = ExtractParams::median(&layout, &extract_grid);
        let buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ExtractParams"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let extract = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("extract BG"),
            layout: &self.extract_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: data.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: medians.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: buf.as_entire_binding() },
            ],
        });
        uniforms.push(buf);

        log::debug!(
            "bitonic plan: {:?} axis, {} lanes × {} (padded {}), {} passes, grid {}×{}×{}",
            layout.axis,
            layout.lanes,
            layout.true_len,
            layout.padded_len,
            passes.len(),
            sort_grid.x,
            sort_grid.y,
            sort_grid.z
        );

        Ok(AxisPlan {
            layout,
            passes,
            sort_grid,
            extract,
            extract_grid,
            generation: workspace.generation(),
            _uniforms: uniforms,
        })
    }

    /// Record every network pass of `plan`, in schedule order.
    ///
    /// A lane of length 1 has an empty schedule and records nothing.
    pub fn encode_sort(&self, encoder: &mut wgpu::CommandEncoder, plan: &AxisPlan) {
        let grid = plan.sort_grid;
        for bind_group in &plan.passes {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compare_exchange"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.sort_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(grid.x, grid.y, grid.z);
        }
    }

    /// Record the median extraction for `plan` (after `encode_sort`).
    pub fn encode_extract(&self, encoder: &mut wgpu::CommandEncoder, plan: &AxisPlan) {
        let grid = plan.extract_grid;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("extract_lane"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.extract_pipeline);
        pass.set_bind_group(0, &plan.extract, &[]);
        pass.dispatch_workgroups(grid.x, grid.y, grid.z);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_pipeline(
    gpu: &GpuDevice,
    bgl: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &'static str,
) -> wgpu::ComputePipeline {
    let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&layout),
        module,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Axis;

    fn grid(lane_span: u32, pair_span: u32, lane_slices: u32) -> DispatchGrid {
        DispatchGrid { x: 1, y: 1, z: lane_slices, lane_span, pair_span, lane_slices }
    }

    #[test]
    fn test_param_struct_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<SortParams>(), 48);
        assert_eq!(std::mem::size_of::<ExtractParams>(), 32);
    }

    #[test]
    fn test_sort_params_from_layout() {
        let layout = LaneLayout::for_axis(100, 7, Axis::Vertical);
        let pass = BitonicPass { stage: 2, block: 8, stride: 2 };
        let p = SortParams::new(&layout, &pass, &grid(32, 64, 3));
        assert_eq!(p.lanes, 7);
        assert_eq!(p.padded_len, 128);
        assert_eq!((p.lane_stride, p.elem_stride), (1, 7));
        assert_eq!((p.block, p.stride), (8, 2));
        assert_eq!((p.lane_span, p.pair_span, p.lane_slices), (32, 64, 3));
    }

    #[test]
    fn test_extract_params_use_floor_median() {
        let even = ExtractParams::median(&LaneLayout::for_axis(3, 256, Axis::Horizontal), &grid(64, 1, 1));
        assert_eq!(even.position, 128);
        assert_eq!((even.lane_stride, even.elem_stride), (256, 1));
        assert_eq!(even.lane_span, 64);
        let odd = ExtractParams::median(&LaneLayout::for_axis(5, 5, Axis::Vertical), &grid(64, 1, 1));
        assert_eq!(odd.position, 2);
    }
}
