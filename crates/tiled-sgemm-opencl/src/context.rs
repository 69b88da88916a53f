//! Platform discovery and device bootstrap.

use std::fmt;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_GPU};
use opencl3::platform::{get_platforms, Platform};
use tracing::{debug, info};

use crate::error::{OpenClError, Result};

/// Capabilities of one GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub driver_version: String,
    pub opencl_c_version: String,
    pub max_work_group_size: usize,
    pub max_compute_units: u32,
    pub local_mem_size: u64,
}

impl DeviceInfo {
    fn query(device: &Device) -> Result<Self> {
        Ok(Self {
            name: device.name().map_err(|e| OpenClError::api("CL_DEVICE_NAME", e))?,
            vendor: device.vendor().map_err(|e| OpenClError::api("CL_DEVICE_VENDOR", e))?,
            version: device.version().map_err(|e| OpenClError::api("CL_DEVICE_VERSION", e))?,
            driver_version: device
                .driver_version()
                .map_err(|e| OpenClError::api("CL_DRIVER_VERSION", e))?,
            opencl_c_version: device
                .opencl_c_version()
                .map_err(|e| OpenClError::api("CL_DEVICE_OPENCL_C_VERSION", e))?,
            max_work_group_size: device
                .max_work_group_size()
                .map_err(|e| OpenClError::api("CL_DEVICE_MAX_WORK_GROUP_SIZE", e))?,
            max_compute_units: device
                .max_compute_units()
                .map_err(|e| OpenClError::api("CL_DEVICE_MAX_COMPUTE_UNITS", e))?,
            local_mem_size: device
                .local_mem_size()
                .map_err(|e| OpenClError::api("CL_DEVICE_LOCAL_MEM_SIZE", e))?,
        })
    }

    /// Side of the largest square work-group: `floor(sqrt(max_work_group_size))`.
    pub fn max_local_size(&self) -> usize {
        (self.max_work_group_size as f64).sqrt() as usize
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Device: {}", self.name)?;
        writeln!(f, "    Vendor:              {}", self.vendor)?;
        writeln!(f, "    Version:             {}", self.version)?;
        writeln!(f, "    Driver version:      {}", self.driver_version)?;
        writeln!(f, "    OpenCL C version:    {}", self.opencl_c_version)?;
        writeln!(f, "    Max work-group size: {}", self.max_work_group_size)?;
        writeln!(f, "    Max compute units:   {}", self.max_compute_units)?;
        write!(f, "    Local memory:        {} bytes", self.local_mem_size)
    }
}

/// A platform and its GPUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<DeviceInfo>,
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform: {}", self.name)?;
        writeln!(f, "  Vendor:  {}", self.vendor)?;
        write!(f, "  Version: {}", self.version)?;
        for device in &self.devices {
            write!(f, "\n{device}")?;
        }
        Ok(())
    }
}

fn platforms() -> Result<Vec<Platform>> {
    let platforms = get_platforms().map_err(|e| OpenClError::api("clGetPlatformIDs", e))?;
    if platforms.is_empty() {
        return Err(OpenClError::NoPlatform);
    }
    Ok(platforms)
}

fn platform_name(platform: &Platform) -> Result<String> {
    platform
        .name()
        .map_err(|e| OpenClError::api("CL_PLATFORM_NAME", e))
}

fn gpus(platform: &Platform) -> Result<Vec<Device>> {
    let ids = platform
        .get_devices(CL_DEVICE_TYPE_GPU)
        .map_err(|e| OpenClError::api("clGetDeviceIDs", e))?;
    Ok(ids.into_iter().map(Device::new).collect())
}

/// Describe every platform and its GPUs.
pub fn list_platforms() -> Result<Vec<PlatformInfo>> {
    platforms()?
        .iter()
        .map(|platform| {
            let devices = gpus(platform)?
                .iter()
                .map(DeviceInfo::query)
                .collect::<Result<Vec<_>>>()?;
            Ok(PlatformInfo {
                name: platform_name(platform)?,
                vendor: platform
                    .vendor()
                    .map_err(|e| OpenClError::api("CL_PLATFORM_VENDOR", e))?,
                version: platform
                    .version()
                    .map_err(|e| OpenClError::api("CL_PLATFORM_VERSION", e))?,
                devices,
            })
        })
        .collect()
}

/// Which device to open.
#[derive(Debug, Clone, Default)]
pub struct OpenClConfig {
    /// Platform index (0-based).
    pub platform_index: usize,
    /// GPU index within the platform (0-based).
    pub device_index: usize,
    /// Override for the square local size limit.
    pub max_local_size: Option<usize>,
}

/// An opened GPU: context and a profiling-enabled in-order queue.
pub struct OpenClDevice {
    pub(crate) queue: CommandQueue,
    pub(crate) context: Context,
    pub(crate) device: Device,
    platform_name: String,
    info: DeviceInfo,
    max_local_size: usize,
}

impl OpenClDevice {
    /// Open the first GPU of the first platform.
    pub fn new() -> Result<Self> {
        Self::with_config(&OpenClConfig::default())
    }

    /// Open the GPU selected by `config`.
    pub fn with_config(config: &OpenClConfig) -> Result<Self> {
        let platforms = platforms()?;
        let platform = platforms
            .get(config.platform_index)
            .ok_or(OpenClError::PlatformIndex {
                index: config.platform_index,
                count: platforms.len(),
            })?;
        let platform_name = platform_name(platform)?;

        let mut devices = gpus(platform)?;
        let count = devices.len();
        if config.device_index >= count {
            return Err(OpenClError::DeviceIndex {
                platform: platform_name,
                index: config.device_index,
                count,
            });
        }
        let device = devices.swap_remove(config.device_index);
        let info = DeviceInfo::query(&device)?;
        debug!(platform = %platform_name, device = %info.name, "opening OpenCL device");

        let context =
            Context::from_device(&device).map_err(|e| OpenClError::api("clCreateContext", e))?;
        let queue =
            CommandQueue::create_default_with_properties(&context, CL_QUEUE_PROFILING_ENABLE, 0)
                .map_err(|e| OpenClError::api("clCreateCommandQueue", e))?;

        let max_local_size = config.max_local_size.unwrap_or_else(|| info.max_local_size());
        info!(
            platform = %platform_name,
            device = %info.name,
            max_work_group_size = info.max_work_group_size,
            max_local_size,
            "OpenCL device ready"
        );

        Ok(Self {
            queue,
            context,
            device,
            platform_name,
            info,
            max_local_size,
        })
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn local_size_limit(&self) -> usize {
        self.max_local_size
    }
}
