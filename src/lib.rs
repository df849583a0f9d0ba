// gpu-separator: per-lane sorting and median filtering of detector frame
// stacks on the GPU.
//
// A `Separator` sorts every column (or row) of a 2D array with a bitonic
// network executed through wgpu, and extracts the middle element of each
// sorted lane as a median filter. Stacking N frames into an (N, pixels)
// array turns that into a per-pixel median across frames, which rejects
// cosmic rays, hot pixels and scattering spikes.
//
// `HostSeparator` offers the same operations on the CPU for machines
// without a usable accelerator.

pub mod error;
pub mod image;
pub mod profile;
pub mod sort;
pub mod stack;

pub mod gpu;

pub use error::{Error, Result};
pub use gpu::{GpuDevice, Separator};
pub use image::{Image, Pixel};
pub use sort::{Axis, HostSeparator};

/// Whether any Vulkan compute adapter (hardware or software) can be
/// selected. Cheap enough to call once at startup or in test setup.
pub fn accelerator_available() -> bool {
    GpuDevice::is_available(gpu::AdapterPreference::Any)
}
