use serde::{Deserialize, Serialize};

use crate::data::DeviceSnapshot;

/// A plotted series. Carries its own scaling and formatting so the renderer
/// never branches on titles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    GpuUtilization,
    MemoryUtilization,
    Temperature,
    PowerDraw,
}

// Power axes never shrink below this many watts.
const MIN_POWER_AXIS: f64 = 50.0;
const POWER_HEADROOM: f64 = 1.2;

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::GpuUtilization,
        MetricKind::MemoryUtilization,
        MetricKind::Temperature,
        MetricKind::PowerDraw,
    ];

    pub fn title(self) -> &'static str {
        match self {
            MetricKind::GpuUtilization => "GPU Utilization",
            MetricKind::MemoryUtilization => "Memory Utilization",
            MetricKind::Temperature => "Temperature",
            MetricKind::PowerDraw => "Power Usage",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            MetricKind::GpuUtilization | MetricKind::MemoryUtilization => "%",
            MetricKind::Temperature => "°C",
            MetricKind::PowerDraw => "W",
        }
    }

    pub fn value(self, snapshot: &DeviceSnapshot) -> f64 {
        match self {
            MetricKind::GpuUtilization => snapshot.gpu_utilization_percent as f64,
            MetricKind::MemoryUtilization => snapshot.memory_utilization_percent as f64,
            MetricKind::Temperature => snapshot.temperature_celsius as f64,
            MetricKind::PowerDraw => snapshot.power_watts,
        }
    }

    /// Top of the y axis for `history`. Percentages and temperature use a
    /// fixed 100; power scales to the peak plus 20%, rounded up.
    pub fn axis_max(self, history: &[DeviceSnapshot]) -> f64 {
        match self {
            MetricKind::PowerDraw => {
                let peak = history
                    .iter()
                    .map(|s| s.power_watts)
                    .fold(0.0_f64, f64::max);
                (peak * POWER_HEADROOM).ceil().max(MIN_POWER_AXIS)
            }
            _ => 100.0,
        }
    }

    pub fn format(self, value: f64) -> String {
        match self {
            MetricKind::Temperature | MetricKind::PowerDraw => {
                format!("{:.0}{}", value, self.unit())
            }
            _ => format!("{:.1}{}", value, self.unit()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power(watts: f64) -> DeviceSnapshot {
        DeviceSnapshot {
            power_watts: watts,
            ..Default::default()
        }
    }

    #[test]
    fn values_come_from_matching_fields() {
        let snap = DeviceSnapshot {
            gpu_utilization_percent: 40,
            memory_utilization_percent: 12,
            temperature_celsius: 66,
            power_watts: 210.5,
            ..Default::default()
        };
        assert_eq!(MetricKind::GpuUtilization.value(&snap), 40.0);
        assert_eq!(MetricKind::MemoryUtilization.value(&snap), 12.0);
        assert_eq!(MetricKind::Temperature.value(&snap), 66.0);
        assert_eq!(MetricKind::PowerDraw.value(&snap), 210.5);
    }

    #[test]
    fn power_axis_has_headroom_and_floor() {
        assert_eq!(MetricKind::PowerDraw.axis_max(&[]), 50.0);
        assert_eq!(MetricKind::PowerDraw.axis_max(&[power(10.0)]), 50.0);
        assert_eq!(
            MetricKind::PowerDraw.axis_max(&[power(100.0), power(250.0)]),
            300.0
        );
        assert_eq!(MetricKind::PowerDraw.axis_max(&[power(101.0)]), 122.0);
    }

    #[test]
    fn fixed_axes_ignore_history() {
        let hot = DeviceSnapshot {
            temperature_celsius: 105,
            ..Default::default()
        };
        assert_eq!(MetricKind::Temperature.axis_max(&[hot]), 100.0);
        assert_eq!(MetricKind::GpuUtilization.axis_max(&[]), 100.0);
    }

    #[test]
    fn formatting_by_kind() {
        assert_eq!(MetricKind::Temperature.format(71.4), "71°C");
        assert_eq!(MetricKind::PowerDraw.format(123.456), "123W");
        assert_eq!(MetricKind::GpuUtilization.format(55.0), "55.0%");
    }
}
