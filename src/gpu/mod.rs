// gpu/mod.rs — wgpu compute layer.
//
// The host implementation in sort.rs is the authoritative reference: every
// GPU result is validated against `sort_lanes` / `median_lanes` element for
// element.
//
// Layering, leaves first:
//
//   device     — adapter selection, limits, capability query, error hook
//   workspace  — padded lane layout, device buffers, upload and readback
//   bitonic    — compare-exchange and median-extraction pipelines
//   separator  — public facade with two-phase (dispatch / get) results
//
// Data crosses the host/device boundary exactly twice per call: one
// upload of the padded input and one readback of the result.

pub mod bitonic;
pub mod device;
pub mod separator;
pub mod workspace;

pub use device::{AdapterPreference, DeviceOptions, DeviceProfile, DispatchGrid, GpuDevice, WorkgroupSize};
pub use separator::{DeviceArray, DeviceVector, Separator};
