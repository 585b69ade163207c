use nvml_wrapper::enum_wrappers::device::{Clock, TemperatureSensor};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};

use crate::data::{ClockDomain, GpuProcess, MemoryUsage, Utilization};
use crate::process;
use crate::source::{TelemetryError, TelemetrySource};

/// NVIDIA devices through NVML. NVML is shut down when this is dropped.
pub struct NvmlSource {
    nvml: Nvml,
}

impl NvmlSource {
    pub fn new() -> Result<Self, TelemetryError> {
        let nvml = init_nvml()?;
        Ok(Self { nvml })
    }

    // Device handles are cheap; take one per query rather than holding a
    // borrow of `nvml` across calls.
    fn device(&self, index: u32) -> Result<Device<'_>, TelemetryError> {
        Ok(self.nvml.device_by_index(index)?)
    }
}

/// Falls back to loading `libnvidia-ml.so.1` explicitly on Linux, where some
/// distributions ship no unversioned `libnvidia-ml.so`.
fn init_nvml() -> Result<Nvml, NvmlError> {
    #[cfg(not(target_os = "linux"))]
    {
        Nvml::init()
    }
    #[cfg(target_os = "linux")]
    {
        match Nvml::init() {
            Ok(nvml) => Ok(nvml),
            Err(_) => Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init(),
        }
    }
}

impl TelemetrySource for NvmlSource {
    fn device_count(&self) -> Result<u32, TelemetryError> {
        Ok(self.nvml.device_count()?)
    }

    fn open_device(&self, index: u32) -> Result<(), TelemetryError> {
        self.device(index).map(|_| ())
    }

    fn driver_version(&self) -> Result<String, TelemetryError> {
        Ok(self.nvml.sys_driver_version()?)
    }

    fn uuid(&self, index: u32) -> Result<String, TelemetryError> {
        Ok(self.device(index)?.uuid()?)
    }

    fn name(&self, index: u32) -> Result<String, TelemetryError> {
        Ok(self.device(index)?.name()?)
    }

    fn utilization(&self, index: u32) -> Result<Utilization, TelemetryError> {
        let util = self.device(index)?.utilization_rates()?;
        Ok(Utilization {
            gpu: util.gpu,
            memory: util.memory,
        })
    }

    fn temperature(&self, index: u32) -> Result<u32, TelemetryError> {
        Ok(self.device(index)?.temperature(TemperatureSensor::Gpu)?)
    }

    fn fan_speed(&self, index: u32) -> Result<u32, TelemetryError> {
        Ok(self.device(index)?.fan_speed(0)?)
    }

    fn power_usage(&self, index: u32) -> Result<u32, TelemetryError> {
        Ok(self.device(index)?.power_usage()?)
    }

    fn power_limit(&self, index: u32) -> Result<u32, TelemetryError> {
        Ok(self.device(index)?.power_management_limit()?)
    }

    fn clock(&self, index: u32, domain: ClockDomain) -> Result<u32, TelemetryError> {
        let clock = match domain {
            ClockDomain::Graphics => Clock::Graphics,
            ClockDomain::Memory => Clock::Memory,
        };
        Ok(self.device(index)?.clock_info(clock)?)
    }

    fn memory(&self, index: u32) -> Result<MemoryUsage, TelemetryError> {
        let mem = self.device(index)?.memory_info()?;
        Ok(MemoryUsage {
            total: mem.total,
            used: mem.used,
        })
    }

    fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, TelemetryError> {
        let procs = self.device(index)?.running_compute_processes()?;
        Ok(procs
            .into_iter()
            .map(|proc| GpuProcess {
                pid: proc.pid,
                used_memory: match proc.used_gpu_memory {
                    UsedGpuMemory::Used(v) => Some(v),
                    UsedGpuMemory::Unavailable => None,
                },
            })
            .collect())
    }

    fn process_name(&self, pid: u32) -> Result<String, TelemetryError> {
        process::resolve_name(pid)
    }
}
