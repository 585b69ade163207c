use thiserror::Error;

use crate::data::{ClockDomain, GpuProcess, MemoryUsage, Utilization};

/// Failure of a single telemetry query.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("NVML call failed: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),
    #[error("query did not finish within its time budget")]
    Timeout,
    #[error("query task failed: {0}")]
    TaskFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not supported on this platform")]
    Unsupported,
    #[error("no device at index {0}")]
    NotFound(u32),
}

/// Hardware telemetry interface consumed by the sampler.
///
/// Devices are addressed by enumeration ordinal. Every call is independent
/// and may fail on its own; implementations must be safe to call from
/// several threads at once since the sampler issues queries in parallel.
pub trait TelemetrySource: Send + Sync + 'static {
    fn device_count(&self) -> Result<u32, TelemetryError>;

    /// Succeeds when a handle to the device at `index` can be obtained.
    fn open_device(&self, index: u32) -> Result<(), TelemetryError>;

    fn driver_version(&self) -> Result<String, TelemetryError>;
    fn uuid(&self, index: u32) -> Result<String, TelemetryError>;
    fn name(&self, index: u32) -> Result<String, TelemetryError>;
    fn utilization(&self, index: u32) -> Result<Utilization, TelemetryError>;
    fn temperature(&self, index: u32) -> Result<u32, TelemetryError>;
    fn fan_speed(&self, index: u32) -> Result<u32, TelemetryError>;

    /// Current draw in milliwatts.
    fn power_usage(&self, index: u32) -> Result<u32, TelemetryError>;

    /// Enforced power limit in milliwatts.
    fn power_limit(&self, index: u32) -> Result<u32, TelemetryError>;

    fn clock(&self, index: u32, domain: ClockDomain) -> Result<u32, TelemetryError>;
    fn memory(&self, index: u32) -> Result<MemoryUsage, TelemetryError>;
    fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, TelemetryError>;

    /// Display name of a host process.
    fn process_name(&self, pid: u32) -> Result<String, TelemetryError>;
}
