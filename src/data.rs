use serde::{Deserialize, Serialize};

// Telemetry of one device at one poll instant. Every field has a value; a
// field whose query failed stays at its zero/empty default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub index: u32,
    pub name: String,
    pub gpu_utilization_percent: u32,
    pub memory_utilization_percent: u32,
    pub temperature_celsius: u32,
    pub fan_speed_percent: u32,
    pub power_watts: f64,
    pub power_limit_watts: u32,
    pub core_clock_mhz: u32,
    pub mem_clock_mhz: u32,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
}

impl DeviceSnapshot {
    /// An all-default snapshot for the device at `index`.
    pub fn empty(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn set_utilization(&mut self, util: Utilization) {
        self.gpu_utilization_percent = util.gpu;
        self.memory_utilization_percent = util.memory;
    }

    pub fn set_power_milliwatts(&mut self, milliwatts: u32) {
        self.power_watts = milliwatts_to_watts(milliwatts);
    }

    pub fn set_power_limit_milliwatts(&mut self, milliwatts: u32) {
        self.power_limit_watts = milliwatts / 1000;
    }

    pub fn set_memory(&mut self, mem: MemoryUsage) {
        self.total_memory_bytes = mem.total;
        self.used_memory_bytes = mem.used;
    }

    /// Used device memory as a percentage of the total, 0 when unknown.
    pub fn memory_used_percent(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        self.used_memory_bytes as f64 / self.total_memory_bytes as f64 * 100.0
    }
}

pub fn milliwatts_to_watts(milliwatts: u32) -> f64 {
    milliwatts as f64 / 1000.0
}

// One process holding a compute context on one device at poll time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub device_index: u32,
    pub pid: u32,
    pub name: String,
    pub memory_used_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Utilization {
    pub gpu: u32,
    pub memory: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
}

// Compute process as reported by the driver, before name resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuProcess {
    pub pid: u32,
    /// `None` when the driver does not expose per-process memory.
    pub used_memory: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    Graphics,
    Memory,
}

/// Everything a renderer needs for one frame, taken under a single lock
/// acquisition so all parts belong to the same poll cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryView {
    /// Number of completed poll cycles.
    pub generation: u64,
    pub driver_version: String,
    pub current: Vec<DeviceSnapshot>,
    pub processes: Vec<ProcessEntry>,
    /// One oldest-first sequence per device slot.
    pub history: Vec<Vec<DeviceSnapshot>>,
}

impl TelemetryView {
    pub fn processes_for(&self, device_index: u32) -> impl Iterator<Item = &ProcessEntry> {
        self.processes
            .iter()
            .filter(move |p| p.device_index == device_index)
    }

    pub fn history_for(&self, device_index: u32) -> &[DeviceSnapshot] {
        self.history
            .get(device_index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_reading_converts_to_watts() {
        let mut snap = DeviceSnapshot::empty(0);
        snap.set_power_milliwatts(123_456);
        assert!((snap.power_watts - 123.456).abs() < 1e-9);
    }

    #[test]
    fn power_limit_truncates_to_whole_watts() {
        let mut snap = DeviceSnapshot::empty(0);
        snap.set_power_limit_milliwatts(350_999);
        assert_eq!(snap.power_limit_watts, 350);
    }

    #[test]
    fn empty_snapshot_is_all_defaults() {
        let snap = DeviceSnapshot::empty(3);
        assert_eq!(snap.index, 3);
        assert!(snap.name.is_empty());
        assert_eq!(snap.gpu_utilization_percent, 0);
        assert_eq!(snap.power_watts, 0.0);
        assert_eq!(snap.total_memory_bytes, 0);
    }

    #[test]
    fn memory_percent_handles_unknown_total() {
        let mut snap = DeviceSnapshot::empty(0);
        assert_eq!(snap.memory_used_percent(), 0.0);
        snap.set_memory(MemoryUsage {
            total: 8 << 30,
            used: 2 << 30,
        });
        assert!((snap.memory_used_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn view_filters_processes_by_device() {
        let view = TelemetryView {
            processes: vec![
                ProcessEntry {
                    device_index: 0,
                    pid: 10,
                    ..Default::default()
                },
                ProcessEntry {
                    device_index: 1,
                    pid: 20,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let pids: Vec<u32> = view.processes_for(1).map(|p| p.pid).collect();
        assert_eq!(pids, vec![20]);
        assert!(view.history_for(5).is_empty());
    }

    #[test]
    fn view_serializes_to_json() {
        let view = TelemetryView {
            generation: 2,
            current: vec![DeviceSnapshot::empty(0)],
            history: vec![vec![DeviceSnapshot::empty(0)]],
            ..Default::default()
        };
        let json = serde_json::to_string(&view).unwrap();
        let back: TelemetryView = serde_json::from_str(&json).unwrap();
        assert_eq!(back, view);
    }
}
