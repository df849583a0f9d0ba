// error.rs — Error taxonomy shared by the host and GPU paths.
//
// Three failure classes matter to callers:
//   construction  → NoDeviceAvailable (fall back to HostSeparator)
//   call time     → ShapeMismatch, before anything is uploaded
//   get() time    → DeviceExecutionFailure, once the queue has drained
//
// The rest are configuration errors that can only come from misuse.

use thiserror::Error;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable GPU adapter, or the adapter refused the device request.
    #[error("no compute accelerator available: {reason}")]
    NoDeviceAvailable { reason: String },

    /// The input shape differs from the shape declared at construction.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A separator cannot be built for a shape with a zero dimension.
    #[error("shape ({rows}, {cols}) has a zero dimension")]
    EmptyShape { rows: usize, cols: usize },

    /// The padded working array does not fit the device storage limits.
    #[error("padded lane buffer of {len} elements exceeds device storage limit of {max}")]
    LaneTooLong { len: u64, max: u64 },

    /// Even folded across all three grid dimensions, the dispatch needs more
    /// workgroups than the device allows per dimension.
    #[error("dispatch of {lanes} lanes × {pairs} pairs exceeds {max_groups} workgroups per dimension")]
    GridTooLarge { lanes: u64, pairs: u64, max_groups: u32 },

    /// Requested workgroup size exceeds the device's invocation limit.
    #[error("workgroup size {total} exceeds device limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    /// Requested workgroup size is zero, not a power of two, or wider than
    /// the device allows in one dimension.
    #[error("invalid workgroup size {x}×{y}: {reason}")]
    InvalidWorkgroupSize { x: u32, y: u32, reason: String },

    /// The driver reported a validation, out-of-memory or mapping fault.
    #[error("device execution failure: {0}")]
    DeviceExecutionFailure(String),

    /// `stack_frames` was given no frames.
    #[error("cannot stack an empty frame list")]
    EmptyStack,

    /// A frame in a stack does not match the shape of the first frame.
    #[error("frame {index} has shape {actual:?}, expected {expected:?}")]
    FrameShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl From<wgpu::BufferAsyncError> for Error {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        Error::DeviceExecutionFailure(format!("readback map failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
