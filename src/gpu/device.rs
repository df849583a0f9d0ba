// gpu/device.rs — wgpu device acquisition and capability query.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and pick one according to an
//     `AdapterPreference` (real hardware only, or anything including
//     software rasterizers).
//   - Expose `GpuDevice::is_available()` so callers and test suites can
//     decide up front whether to use the GPU separator or the host one.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (cap invocations to match a Raspberry Pi).
//   - Provide `WorkgroupSize`, the 2D workgroup used by the sort kernel
//     (x = lanes, y = compare-exchange pairs), and `DispatchGrid`, which
//     folds dispatches too wide for one grid dimension into z.
//   - Capture driver errors reported outside any call (validation, OOM)
//     so the separator can surface them when a result is materialized.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` may grab llvmpipe/softpipe on WSL2
// where the software renderer appears as a valid Vulkan device. We
// enumerate explicitly and rank real GPUs first. With
// `AdapterPreference::Hardware`, CPU adapters are never selected.
//
// SHARING:
// `GpuDevice` is meant to be wrapped in an `Arc` and handed to every
// `Separator` bound to the same accelerator. `wgpu::Device` and
// `wgpu::Queue` are `Send + Sync`; nothing here needs `&mut self` after
// construction except `set_workgroup_size`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Hardware profile controlling device limits and default workgroup sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceProfile {
    /// Use the adapter's default limits. No artificial caps.
    #[default]
    Native,
    /// Simulate Raspberry Pi 4/5 (VideoCore VI/VII, V3DV Vulkan).
    /// Caps `max_compute_invocations_per_workgroup` to 256.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// Which adapters may be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterPreference {
    /// Discrete, integrated, virtual or "other" (dzn) adapters only.
    Hardware,
    /// Prefer hardware, fall back to a software rasterizer (llvmpipe,
    /// lavapipe) if that is all there is.
    #[default]
    Any,
}

/// Options for [`GpuDevice::acquire_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceOptions {
    pub profile: DeviceProfile,
    pub adapter: AdapterPreference,
}

/// A workgroup size configuration for 2D compute dispatches.
///
/// Both dimensions must be powers of two and their product must not exceed
/// the profile's `max_compute_invocations_per_workgroup` limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y)
    }

    /// Placeholder substitutions for the WGSL templates.
    ///
    /// naga does not accept `override` expressions inside
    /// `@workgroup_size()`, so shader sources carry `{{WG_X}}`/`{{WG_Y}}`
    /// tokens that are replaced before compilation.
    pub fn as_substitutions(&self) -> HashMap<&'static str, String> {
        HashMap::from([("{{WG_X}}", self.x.to_string()), ("{{WG_Y}}", self.y.to_string())])
    }

    /// Default workgroup size for the given profile.
    ///
    /// The sort dispatch is (lanes, pairs). Lanes are the fastest-varying
    /// address for a vertical sort (adjacent columns are adjacent in
    /// memory), so x is the wide dimension.
    ///
    /// - `Native`: 32×4 = 128 invocations (one NVIDIA warp across x).
    /// - `RaspberryPi`: 8×8 = 64 invocations.
    fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::Native => WorkgroupSize { x: 32, y: 4 },
            DeviceProfile::RaspberryPi => WorkgroupSize { x: 8, y: 8 },
        }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// The GPU context: adapter, device, queue, and active profile.
///
/// Expensive to create (Vulkan instance + device initialization). Create
/// one, wrap it in `Arc`, and share it between separators.
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`. dzn (D3D12-to-Vulkan on WSL2) crashes if the Vulkan
/// instance is destroyed while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    workgroup_size: WorkgroupSize,
    /// First driver error reported through the uncaptured-error hook since
    /// the last `take_error()`.
    errors: Arc<Mutex<Option<String>>>,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Acquire a device with default options (native limits, any adapter).
    ///
    /// # Errors
    /// `Error::NoDeviceAvailable` if no adapter is found or the device
    /// request fails.
    pub fn acquire() -> Result<Self> {
        Self::acquire_with(DeviceOptions::default())
    }

    /// Acquire a device with an explicit profile and adapter preference.
    pub fn acquire_with(options: DeviceOptions) -> Result<Self> {
        pollster::block_on(Self::init_async(options))
    }

    /// Whether an adapter matching `preference` exists. Does not create a
    /// device.
    pub fn is_available(preference: AdapterPreference) -> bool {
        let instance = create_instance();
        select_adapter(&instance, preference).is_some()
    }

    /// Explicit teardown. Equivalent to dropping the last reference.
    pub fn release(self) {
        log::debug!("releasing GPU device {}", self.adapter_info);
    }

    async fn init_async(options: DeviceOptions) -> Result<Self> {
        let instance = create_instance();

        let adapter = select_adapter(&instance, options.adapter).ok_or_else(|| {
            Error::NoDeviceAvailable {
                reason: match options.adapter {
                    AdapterPreference::Hardware => {
                        "no hardware Vulkan adapter found (only CPU/software renderers, or none)"
                            .to_string()
                    }
                    AdapterPreference::Any => "no Vulkan adapter found".to_string(),
                },
            }
        })?;

        let adapter_info = AdapterInfo::from(adapter.get_info());
        log::info!("selected compute adapter: {adapter_info}");

        // Auto-detect RPi when the caller passed Native but the adapter is V3D.
        let profile = match options.profile {
            DeviceProfile::Native if adapter_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpu-separator"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile, &adapter.limits()),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::NoDeviceAvailable {
                reason: format!("device request on {adapter_info} failed: {e}"),
            })?;

        // Errors raised by the driver outside an error scope (validation,
        // out-of-memory) would otherwise panic inside wgpu's default
        // handler. Keep the first one until a readback collects it.
        let errors: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |e| {
            log::error!("wgpu error: {e}");
            if let Ok(mut slot) = sink.lock() {
                slot.get_or_insert_with(|| e.to_string());
            }
        }));

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::for_profile(profile),
            errors,
            _instance: instance,
        })
    }

    /// Take the first driver error recorded since the last call.
    pub fn take_error(&self) -> Option<String> {
        self.errors.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Largest working array the device can bind and allocate, in bytes.
    pub fn max_storage_bytes(&self) -> u64 {
        let limits = self.device.limits();
        (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size)
    }

    /// Workgroup size the sort kernel is compiled with.
    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup_size
    }

    /// Override the default workgroup size.
    ///
    /// Only separators built afterwards pick it up, so call this before the
    /// device is wrapped in an `Arc`.
    ///
    /// # Errors
    /// `InvalidWorkgroupSize` for zero, non-power-of-two or over-wide
    /// dimensions; `WorkgroupTooLarge` when `x * y` exceeds the device's
    /// invocation limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<()> {
        self.workgroup_size = check_workgroup_size(x, y, &self.device.limits())?;
        log::debug!("workgroup size set to {}", self.workgroup_size);
        Ok(())
    }

    /// Grid covering `(lanes, pairs)` invocations with the sort workgroup.
    pub fn sort_grid(&self, lanes: usize, pairs: usize) -> Result<DispatchGrid> {
        self.grid(self.workgroup_size, lanes, pairs)
    }

    /// Grid covering `lanes` invocations with a 1-D workgroup of
    /// `group_size`.
    pub fn lane_grid(&self, lanes: usize, group_size: u32) -> Result<DispatchGrid> {
        self.grid(WorkgroupSize { x: group_size, y: 1 }, lanes, 1)
    }

    fn grid(&self, ws: WorkgroupSize, lanes: usize, pairs: usize) -> Result<DispatchGrid> {
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        let too_large = || Error::GridTooLarge { lanes: lanes as u64, pairs: pairs as u64, max_groups };
        let lanes = u32::try_from(lanes).map_err(|_| too_large())?;
        let pairs = u32::try_from(pairs).map_err(|_| too_large())?;
        fold_grid(ws, max_groups, lanes, pairs).ok_or_else(too_large)
    }
}

/// Workgroup counts for one dispatch, plus what the shader needs to map
/// `global_invocation_id` back to a (lane, pair).
///
/// Lanes run along x and pairs along y. When either needs more than
/// `max_compute_workgroups_per_dimension` groups it is cut into slices, and
/// z enumerates the (lane slice, pair slice) tiles, lane slice fastest:
///
///   lane = gid.x + (gid.z % lane_slices) * lane_span
///   pair = gid.y + (gid.z / lane_slices) * pair_span
///
/// Invocations past the real lane or pair count are discarded by the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Lanes covered by one lane slice (`x * workgroup x`).
    pub lane_span: u32,
    /// Pairs covered by one pair slice (`y * workgroup y`).
    pub pair_span: u32,
    pub lane_slices: u32,
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Adapter helpers
// ============================================================

fn create_instance() -> wgpu::Instance {
    // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets dzn on WSL2 through; it is
    // fine for compute-only work on storage buffers.
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        flags,
        ..Default::default()
    })
}

/// Rank an adapter type; lower is better, `None` means never select.
fn adapter_rank(ty: wgpu::DeviceType, preference: AdapterPreference) -> Option<u8> {
    match ty {
        wgpu::DeviceType::DiscreteGpu => Some(0),
        wgpu::DeviceType::IntegratedGpu => Some(1),
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => Some(2),
        wgpu::DeviceType::Cpu => match preference {
            AdapterPreference::Hardware => None,
            AdapterPreference::Any => Some(3),
        },
    }
}

fn select_adapter(instance: &wgpu::Instance, preference: AdapterPreference) -> Option<wgpu::Adapter> {
    let adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
    for a in &adapters {
        let info = a.get_info();
        log::debug!("Vulkan adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
    }
    adapters
        .into_iter()
        .filter_map(|a| adapter_rank(a.get_info().device_type, preference).map(|r| (r, a)))
        .min_by_key(|(r, _)| *r)
        .map(|(_, a)| a)
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile.
///
/// `Native` asks for everything the adapter offers, so large frame stacks
/// are not held to the 128 MiB default binding size. Under a non-Native
/// profile we request *lower* limits than the hardware supports; wgpu
/// validates dispatches against the requested limits, so violations show
/// up on the development machine.
fn limits_for_profile(profile: DeviceProfile, adapter: &wgpu::Limits) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => adapter.clone(),
        DeviceProfile::RaspberryPi => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            // 128 MiB of the shared 4 GiB.
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn check_workgroup_size(x: u32, y: u32, limits: &wgpu::Limits) -> Result<WorkgroupSize> {
    let invalid = |reason: String| Error::InvalidWorkgroupSize { x, y, reason };
    if x == 0 || y == 0 {
        return Err(invalid("dimensions must be non-zero".into()));
    }
    if !x.is_power_of_two() || !y.is_power_of_two() {
        return Err(invalid("dimensions must be powers of two".into()));
    }
    if x > limits.max_compute_workgroup_size_x || y > limits.max_compute_workgroup_size_y {
        return Err(invalid(format!(
            "device allows at most {}×{}",
            limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y
        )));
    }
    let max = limits.max_compute_invocations_per_workgroup;
    match x.checked_mul(y) {
        Some(total) if total <= max => Ok(WorkgroupSize { x, y }),
        total => Err(Error::WorkgroupTooLarge { total: total.unwrap_or(u32::MAX), max }),
    }
}

// ============================================================
// Dispatch grid
// ============================================================

/// Fold a `(lanes, pairs)` invocation grid into at most `max_groups`
/// workgroups per dimension. `None` if even z overflows.
fn fold_grid(ws: WorkgroupSize, max_groups: u32, lanes: u32, pairs: u32) -> Option<DispatchGrid> {
    if ws.x == 0 || ws.y == 0 || max_groups == 0 {
        return None;
    }
    let (x, lane_slices) = fold_axis(lanes.div_ceil(ws.x).max(1), max_groups);
    let (y, pair_slices) = fold_axis(pairs.div_ceil(ws.y).max(1), max_groups);
    let z = lane_slices.checked_mul(pair_slices).filter(|&z| z <= max_groups)?;
    Some(DispatchGrid {
        x,
        y,
        z,
        lane_span: x.checked_mul(ws.x)?,
        pair_span: y.checked_mul(ws.y)?,
        lane_slices,
    })
}

/// Split `groups` into the fewest equal slices of at most `max_groups`.
fn fold_axis(groups: u32, max_groups: u32) -> (u32, u32) {
    let slices = groups.div_ceil(max_groups);
    (groups.div_ceil(slices), slices)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that need a real adapter live in tests/test_separator.rs and
    // skip themselves when `GpuDevice::is_available()` is false.

    #[test]
    fn test_workgroup_substitutions() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        assert_eq!(ws.total(), 128);
        let s = ws.as_substitutions();
        assert_eq!(s["{{WG_X}}"], "16");
        assert_eq!(s["{{WG_Y}}"], "8");
    }

    #[test]
    fn test_workgroup_size_for_profiles() {
        let native = WorkgroupSize::for_profile(DeviceProfile::Native);
        assert_eq!(native.total(), 128);
        let rpi = WorkgroupSize::for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(rpi, WorkgroupSize { x: 8, y: 8 });
        let limits = limits_for_profile(DeviceProfile::RaspberryPi, &wgpu::Limits::default());
        assert!(rpi.total() <= limits.max_compute_invocations_per_workgroup);
    }

    #[test]
    fn test_fold_grid_fits_in_one_slice() {
        let ws = WorkgroupSize { x: 32, y: 4 };
        // 256 lanes, 64 pairs (lane length 128) → exact.
        let g = fold_grid(ws, 65535, 256, 64).unwrap();
        assert_eq!((g.x, g.y, g.z), (8, 16, 1));
        assert_eq!((g.lane_span, g.pair_span, g.lane_slices), (256, 64, 1));
        // 257 lanes, 129 pairs → one extra group each way.
        let g = fold_grid(ws, 65535, 257, 129).unwrap();
        assert_eq!((g.x, g.y, g.z), (9, 33, 1));
        let g = fold_grid(ws, 65535, 1, 1).unwrap();
        assert_eq!((g.x, g.y, g.z), (1, 1, 1));
    }

    #[test]
    fn test_fold_grid_splits_wide_lane_axis_into_z() {
        // Vertical stack of 9 frames of a 2048×2048 detector: 4M lanes of 16.
        let ws = WorkgroupSize { x: 32, y: 4 };
        let lanes = 2048 * 2048;
        let g = fold_grid(ws, 65535, lanes, 8).unwrap();
        assert!(g.x <= 65535 && g.z <= 65535);
        assert_eq!(g.lane_slices, g.z);
        assert_eq!(g.lane_span, g.x * 32);
        assert!(g.lane_span as u64 * g.lane_slices as u64 >= lanes as u64);
        assert_eq!((g.x, g.z), (43691, 3));
    }

    #[test]
    fn test_fold_grid_splits_both_axes() {
        let ws = WorkgroupSize { x: 1, y: 1 };
        // 6 lanes and 5 pairs, at most 4 groups per dimension.
        let g = fold_grid(ws, 4, 6, 5).unwrap();
        assert_eq!((g.x, g.y, g.z), (3, 3, 4));
        assert_eq!((g.lane_span, g.pair_span, g.lane_slices), (3, 3, 2));
        // Every (lane, pair) is reached by some (gid, tile).
        for lane in 0..6u32 {
            for pair in 0..5u32 {
                let tile_l = lane / g.lane_span;
                let tile_p = pair / g.pair_span;
                assert!(tile_l < g.lane_slices);
                assert!(tile_l + tile_p * g.lane_slices < g.z, "({lane}, {pair})");
            }
        }
    }

    #[test]
    fn test_fold_grid_rejects_overflowing_z() {
        let ws = WorkgroupSize { x: 1, y: 1 };
        assert!(fold_grid(ws, 4, 17, 17).is_none());
        assert!(fold_grid(WorkgroupSize { x: 0, y: 4 }, 65535, 8, 8).is_none());
    }

    #[test]
    fn test_check_workgroup_size() {
        let limits = wgpu::Limits::default();
        assert_eq!(check_workgroup_size(16, 8, &limits).unwrap(), WorkgroupSize { x: 16, y: 8 });
        assert!(matches!(
            check_workgroup_size(0, 4, &limits),
            Err(Error::InvalidWorkgroupSize { x: 0, y: 4, .. })
        ));
        assert!(matches!(
            check_workgroup_size(12, 4, &limits),
            Err(Error::InvalidWorkgroupSize { .. })
        ));
        assert!(matches!(
            check_workgroup_size(1 << 30, 1, &limits),
            Err(Error::InvalidWorkgroupSize { .. })
        ));
        // Each dimension fits (256) but the product does not.
        assert!(matches!(
            check_workgroup_size(256, 256, &limits),
            Err(Error::WorkgroupTooLarge { total: 65536, .. })
        ));
        // Product overflows u32 when per-dimension limits are unbounded.
        let wide = wgpu::Limits {
            max_compute_workgroup_size_x: u32::MAX,
            max_compute_workgroup_size_y: u32::MAX,
            ..wgpu::Limits::default()
        };
        assert!(matches!(
            check_workgroup_size(1 << 16, 1 << 16, &wide),
            Err(Error::WorkgroupTooLarge { total: u32::MAX, .. })
        ));
    }

    #[test]
    fn test_rpi_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi, &wgpu::Limits::default());
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_storage_buffer_binding_size, 128 << 20);
    }

    #[test]
    fn test_native_limits_follow_adapter() {
        let adapter = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 30,
            max_buffer_size: 1 << 31,
            ..wgpu::Limits::default()
        };
        assert_eq!(limits_for_profile(DeviceProfile::Native, &adapter), adapter);
    }

    #[test]
    fn test_adapter_rank_respects_preference() {
        assert_eq!(adapter_rank(wgpu::DeviceType::Cpu, AdapterPreference::Hardware), None);
        assert_eq!(adapter_rank(wgpu::DeviceType::Cpu, AdapterPreference::Any), Some(3));
        assert!(
            adapter_rank(wgpu::DeviceType::DiscreteGpu, AdapterPreference::Any)
                < adapter_rank(wgpu::DeviceType::IntegratedGpu, AdapterPreference::Any)
        );
    }
}
