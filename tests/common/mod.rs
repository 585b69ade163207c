//! Scripted in-memory telemetry source shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rgm::data::{ClockDomain, GpuProcess, MemoryUsage, Utilization};
use rgm::source::{TelemetryError, TelemetrySource};

#[derive(Clone, Debug)]
pub struct FakeDevice {
    pub uuid: String,
    pub name: String,
    pub plugged: bool,
    pub handle_fails: bool,
    pub utilization: Utilization,
    pub temperature: u32,
    pub fan_speed: u32,
    pub power_mw: u32,
    pub power_limit_mw: u32,
    pub core_clock: u32,
    pub mem_clock: u32,
    pub memory: MemoryUsage,
    pub processes: Vec<GpuProcess>,
    /// Field names whose query returns an error.
    pub failing: HashSet<&'static str>,
    /// Field names whose query sleeps before answering.
    pub hanging: HashMap<&'static str, Duration>,
}

impl FakeDevice {
    pub fn new(uuid: &str, name: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: name.to_string(),
            plugged: true,
            handle_fails: false,
            utilization: Utilization { gpu: 50, memory: 20 },
            temperature: 60,
            fan_speed: 40,
            power_mw: 150_000,
            power_limit_mw: 300_000,
            core_clock: 1800,
            mem_clock: 9500,
            memory: MemoryUsage {
                total: 8 << 30,
                used: 1 << 30,
            },
            processes: Vec::new(),
            failing: HashSet::new(),
            hanging: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Script {
    pub devices: Vec<FakeDevice>,
    pub process_names: HashMap<u32, String>,
    pub count_fails: bool,
    pub driver_version: String,
    /// Number of calls that entered a simulated hang.
    pub hung_calls: usize,
}

/// Cheap to clone; every clone shares the same script.
#[derive(Clone, Default)]
pub struct FakeSource {
    script: Arc<Mutex<Script>>,
}

impl FakeSource {
    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        let source = Self::default();
        {
            let mut script = source.script.lock().unwrap();
            script.devices = devices;
            script.driver_version = "555.42".to_string();
        }
        source
    }

    pub fn edit<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    pub fn device(&self, slot: usize, f: impl FnOnce(&mut FakeDevice)) {
        self.edit(|s| f(&mut s.devices[slot]));
    }

    // Resolves an enumeration ordinal against the plugged devices, then
    // answers without holding the lock while a hang is simulated.
    fn query<T>(
        &self,
        ordinal: u32,
        field: &'static str,
        read: impl FnOnce(&FakeDevice) -> T,
    ) -> Result<T, TelemetryError> {
        let (value, hang) = {
            let mut script = self.script.lock().unwrap();
            let device = script
                .devices
                .iter()
                .filter(|d| d.plugged)
                .nth(ordinal as usize)
                .ok_or(TelemetryError::NotFound(ordinal))?;
            if device.failing.contains(field) {
                return Err(TelemetryError::Unsupported);
            }
            let answer = (read(device), device.hanging.get(field).copied());
            if answer.1.is_some() {
                script.hung_calls += 1;
            }
            answer
        };
        if let Some(delay) = hang {
            thread::sleep(delay);
        }
        Ok(value)
    }
}

impl TelemetrySource for FakeSource {
    fn device_count(&self) -> Result<u32, TelemetryError> {
        let script = self.script.lock().unwrap();
        if script.count_fails {
            return Err(TelemetryError::Unsupported);
        }
        Ok(script.devices.iter().filter(|d| d.plugged).count() as u32)
    }

    fn open_device(&self, index: u32) -> Result<(), TelemetryError> {
        let fails = self.query(index, "handle", |d| d.handle_fails)?;
        if fails {
            Err(TelemetryError::NotFound(index))
        } else {
            Ok(())
        }
    }

    fn driver_version(&self) -> Result<String, TelemetryError> {
        Ok(self.script.lock().unwrap().driver_version.clone())
    }

    fn uuid(&self, index: u32) -> Result<String, TelemetryError> {
        self.query(index, "uuid", |d| d.uuid.clone())
    }

    fn name(&self, index: u32) -> Result<String, TelemetryError> {
        self.query(index, "name", |d| d.name.clone())
    }

    fn utilization(&self, index: u32) -> Result<Utilization, TelemetryError> {
        self.query(index, "utilization", |d| d.utilization)
    }

    fn temperature(&self, index: u32) -> Result<u32, TelemetryError> {
        self.query(index, "temperature", |d| d.temperature)
    }

    fn fan_speed(&self, index: u32) -> Result<u32, TelemetryError> {
        self.query(index, "fan_speed", |d| d.fan_speed)
    }

    fn power_usage(&self, index: u32) -> Result<u32, TelemetryError> {
        self.query(index, "power_usage", |d| d.power_mw)
    }

    fn power_limit(&self, index: u32) -> Result<u32, TelemetryError> {
        self.query(index, "power_limit", |d| d.power_limit_mw)
    }

    fn clock(&self, index: u32, domain: ClockDomain) -> Result<u32, TelemetryError> {
        match domain {
            ClockDomain::Graphics => self.query(index, "core_clock", |d| d.core_clock),
            ClockDomain::Memory => self.query(index, "mem_clock", |d| d.mem_clock),
        }
    }

    fn memory(&self, index: u32) -> Result<MemoryUsage, TelemetryError> {
        self.query(index, "memory", |d| d.memory)
    }

    fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, TelemetryError> {
        self.query(index, "compute_processes", |d| d.processes.clone())
    }

    fn process_name(&self, pid: u32) -> Result<String, TelemetryError> {
        self.script
            .lock()
            .unwrap()
            .process_names
            .get(&pid)
            .cloned()
            .ok_or(TelemetryError::NotFound(pid))
    }
}

pub fn two_gpus() -> FakeSource {
    FakeSource::with_devices(vec![
        FakeDevice::new("GPU-aaaa", "NVIDIA GeForce RTX 4090"),
        FakeDevice::new("GPU-bbbb", "NVIDIA GeForce RTX 3060"),
    ])
}

pub fn process(pid: u32, used: u64) -> GpuProcess {
    GpuProcess {
        pid,
        used_memory: Some(used),
    }
}
