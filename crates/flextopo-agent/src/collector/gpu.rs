use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::Nvml;
use topology::GpuDescriptor;
use tracing::info;
use tracing::warn;

use super::CollectorError;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Source of GPU inventory and per-process GPU usage.
pub(crate) trait GpuInventory: Send + Sync {
    /// Lists the GPUs present on this machine.
    fn devices(&self) -> Result<Vec<GpuDescriptor>, Report<CollectorError>>;

    /// Returns the uuids of the GPUs on which `pid` runs compute work.
    fn gpus_for_process(&self, pid: u32) -> Result<Vec<String>, Report<CollectorError>>;
}

/// GPU inventory backed by NVML.
///
/// A machine without a usable NVML library reports no GPUs.
pub(crate) struct NvmlInventory {
    nvml: Option<Nvml>,
}

impl NvmlInventory {
    pub(crate) fn init() -> Self {
        match init_nvml() {
            Ok(nvml) => Self { nvml: Some(nvml) },
            Err(e) => {
                warn!("NVML unavailable, assuming no GPUs present: {e}");
                Self::disabled()
            }
        }
    }

    pub(crate) fn disabled() -> Self {
        Self { nvml: None }
    }
}

/// NVML-backed inventory, or an empty one when GPU discovery is disabled.
pub(crate) fn nvml_inventory(disable_gpu: bool) -> Arc<dyn GpuInventory> {
    if disable_gpu {
        Arc::new(NvmlInventory::disabled())
    } else {
        Arc::new(NvmlInventory::init())
    }
}

fn init_nvml() -> Result<Nvml, nvml_wrapper::error::NvmlError> {
    match Nvml::init() {
        Ok(nvml) => {
            info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(_) => {
            warn!("Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()?;
            info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

impl GpuInventory for NvmlInventory {
    fn devices(&self) -> Result<Vec<GpuDescriptor>, Report<CollectorError>> {
        let Some(nvml) = &self.nvml else {
            return Ok(Vec::new());
        };

        let device_count = nvml.device_count().change_context(CollectorError::GpuQuery {
            message: "failed to count devices".to_string(),
        })?;

        let mut gpus = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            let query = || -> Result<GpuDescriptor, nvml_wrapper::error::NvmlError> {
                let device = nvml.device_by_index(index)?;
                Ok(GpuDescriptor {
                    index,
                    uuid: device.uuid()?,
                    name: device.name()?,
                    memory_total_mib: device.memory_info()?.total / BYTES_PER_MIB,
                })
            };
            match query() {
                Ok(gpu) => gpus.push(gpu),
                Err(e) => warn!(index, "Skipping GPU that failed to report: {e}"),
            }
        }

        info!("Discovered {} GPU device(s)", gpus.len());
        Ok(gpus)
    }

    fn gpus_for_process(&self, pid: u32) -> Result<Vec<String>, Report<CollectorError>> {
        let Some(nvml) = &self.nvml else {
            return Ok(Vec::new());
        };

        let device_count = nvml.device_count().change_context(CollectorError::GpuQuery {
            message: "failed to count devices".to_string(),
        })?;

        let mut uuids = Vec::new();
        for index in 0..device_count {
            let device = nvml
                .device_by_index(index)
                .change_context(CollectorError::GpuQuery {
                    message: format!("failed to open device {index}"),
                })?;
            let processes = device
                .running_compute_processes()
                .change_context(CollectorError::GpuQuery {
                    message: format!("failed to list compute processes of device {index}"),
                })?;
            if processes.iter().any(|process| process.pid == pid) {
                uuids.push(device.uuid().change_context(CollectorError::GpuQuery {
                    message: format!("failed to read uuid of device {index}"),
                })?);
            }
        }
        Ok(uuids)
    }
}
