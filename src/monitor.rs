use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::spawn_blocking;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::{QueryTimeouts, HISTORY_CAPACITY};
use crate::data::{ClockDomain, DeviceSnapshot, ProcessEntry, TelemetryView};
use crate::history::HistoryStore;
use crate::nvml::NvmlSource;
use crate::source::{TelemetryError, TelemetrySource};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("GPU driver/runtime not available: {0}")]
    Unavailable(#[source] TelemetryError),
    #[error("no GPU devices found")]
    NoDevices,
    #[error("monitor has been shut down")]
    ShutDown,
}

type Opener<S> = Box<dyn Fn() -> Result<S, TelemetryError> + Send + Sync>;

/// Polls a [`TelemetrySource`] and publishes per-device snapshots, the
/// compute-process list and a bounded history for every device.
///
/// Everything a reader can see lives behind one lock and is replaced in a
/// single critical section per poll, so readers observe either the state
/// before a poll or the state after it.
pub struct Sampler<S: TelemetrySource> {
    open: Opener<S>,
    timeouts: QueryTimeouts,
    state: Mutex<State<S>>,
    // Serialises poll cycles; never held by readers.
    polling: tokio::sync::Mutex<()>,
    // Outlives single polls so a call stuck in the driver is not reissued.
    in_flight: Arc<InFlight>,
}

struct State<S> {
    source: Option<Arc<S>>,
    shut_down: bool,
    driver_version: String,
    generation: u64,
    current: Vec<DeviceSnapshot>,
    processes: Vec<ProcessEntry>,
    history: HistoryStore,
}

// What one device yielded during the query phase, before slot resolution.
struct Sampled {
    ordinal: u32,
    uuid: Option<String>,
    snapshot: DeviceSnapshot,
    processes: Vec<ProcessEntry>,
}

impl<S: TelemetrySource> Sampler<S> {
    /// `open` connects to the telemetry interface; it is called by
    /// [`initialize`](Self::initialize) until a connection succeeds.
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> Result<S, TelemetryError> + Send + Sync + 'static,
    {
        Self {
            open: Box::new(open),
            timeouts: QueryTimeouts::default(),
            state: Mutex::new(State {
                source: None,
                shut_down: false,
                driver_version: String::new(),
                generation: 0,
                current: Vec::new(),
                processes: Vec::new(),
                history: HistoryStore::default(),
            }),
            polling: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: QueryTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    // The state is only ever written whole, so a panicking holder cannot
    // leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, State<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects to the telemetry interface and allocates one history slot per
    /// device present now. Calling it again after success is a no-op.
    pub fn initialize(&self) -> Result<(), MonitorError> {
        {
            let state = self.lock();
            if state.shut_down {
                return Err(MonitorError::ShutDown);
            }
            if state.source.is_some() {
                return Ok(());
            }
        }

        let source = (self.open)().map_err(MonitorError::Unavailable)?;
        let count = source.device_count().map_err(MonitorError::Unavailable)?;
        if count == 0 {
            return Err(MonitorError::NoDevices);
        }
        let bindings: Vec<Option<String>> = (0..count)
            .map(|index| match source.uuid(index) {
                Ok(uuid) => Some(uuid),
                Err(err) => {
                    warn!(index, %err, "no UUID for device, tracking it by position");
                    None
                }
            })
            .collect();
        let driver_version = source.driver_version().unwrap_or_default();

        let mut state = self.lock();
        if state.shut_down {
            return Err(MonitorError::ShutDown);
        }
        if state.source.is_some() {
            // Another caller won the race; ours is dropped here.
            return Ok(());
        }
        state.history = HistoryStore::new(bindings, HISTORY_CAPACITY);
        state.driver_version = driver_version;
        state.source = Some(Arc::new(source));
        info!(
            devices = count,
            driver = %state.driver_version,
            "telemetry source initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().source.is_some()
    }

    /// Number of history slots allocated at initialisation.
    pub fn device_slots(&self) -> usize {
        self.lock().history.slot_count()
    }

    /// Runs one poll cycle: queries every device, then atomically replaces
    /// the current snapshots and process list and extends each history.
    ///
    /// Individual query failures only default the affected field. A device
    /// whose handle cannot be obtained is left out of this cycle and gets no
    /// history entry. Before initialisation and after shutdown this does
    /// nothing.
    pub async fn poll(&self) {
        let _cycle = self.polling.lock().await;

        let (source, slots) = {
            let state = self.lock();
            match &state.source {
                Some(source) => (Arc::clone(source), state.history.slot_count() as u32),
                None => return,
            }
        };
        let query = Query {
            source,
            in_flight: Arc::clone(&self.in_flight),
            per_query: self.timeouts.per_query,
            deadline: Instant::now() + self.timeouts.per_poll,
        };

        let count = match query.run(Call::DeviceCount, |s| s.device_count()).await {
            Ok(count) => count,
            Err(err) => {
                debug!(%err, "device count query failed, using startup count");
                slots
            }
        };
        if count != slots {
            debug!(count, slots, "device count differs from startup");
        }

        let mut sampled = Vec::with_capacity(count as usize);
        for ordinal in 0..count {
            if let Some(device) = sample_device(&query, ordinal).await {
                sampled.push(device);
            }
        }

        self.publish(sampled);
    }

    fn publish(&self, sampled: Vec<Sampled>) {
        let mut state = self.lock();
        if state.source.is_none() {
            return;
        }

        let mut current = Vec::with_capacity(sampled.len());
        let mut processes = Vec::new();
        let mut claimed = vec![false; state.history.slot_count()];

        for device in sampled {
            let Some(slot) = state.history.resolve(device.uuid.as_deref(), device.ordinal) else {
                debug!(
                    ordinal = device.ordinal,
                    uuid = ?device.uuid,
                    "no history slot for device, ignoring"
                );
                continue;
            };
            if std::mem::replace(&mut claimed[slot as usize], true) {
                warn!(ordinal = device.ordinal, slot, "slot already filled this cycle");
                continue;
            }

            let mut snapshot = device.snapshot;
            snapshot.index = slot;
            state.history.append(slot, snapshot.clone());
            current.push(snapshot);
            processes.extend(device.processes.into_iter().map(|mut p| {
                p.device_index = slot;
                p
            }));
        }

        current.sort_by_key(|s| s.index);
        state.current = current;
        state.processes = processes;
        state.generation += 1;
        trace!(
            generation = state.generation,
            devices = state.current.len(),
            processes = state.processes.len(),
            "poll published"
        );
    }

    pub fn current_snapshots(&self) -> Vec<DeviceSnapshot> {
        self.lock().current.clone()
    }

    pub fn processes(&self) -> Vec<ProcessEntry> {
        self.lock().processes.clone()
    }

    /// One oldest-first sequence per device slot.
    pub fn history(&self) -> Vec<Vec<DeviceSnapshot>> {
        self.lock().history.to_vecs()
    }

    /// Current snapshots, processes and history of the same poll cycle.
    pub fn view(&self) -> TelemetryView {
        let state = self.lock();
        TelemetryView {
            generation: state.generation,
            driver_version: state.driver_version.clone(),
            current: state.current.clone(),
            processes: state.processes.clone(),
            history: state.history.to_vecs(),
        }
    }

    /// Releases the telemetry source. Queries still in flight hold their own
    /// reference, so the interface is closed only once they return. Published
    /// data stays readable.
    pub fn shutdown(&self) {
        let source = {
            let mut state = self.lock();
            state.shut_down = true;
            state.source.take()
        };
        if source.is_some() {
            info!("telemetry source released");
        }
    }
}

impl Sampler<NvmlSource> {
    pub fn nvml() -> Self {
        Self::new(NvmlSource::new)
    }
}

/// Builds and initializes the NVIDIA sampler.
pub fn create_monitor() -> Result<Arc<Sampler<NvmlSource>>, MonitorError> {
    let sampler = Sampler::nvml();
    sampler.initialize()?;
    Ok(Arc::new(sampler))
}

/// Identifies one source call across poll cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Call {
    DeviceCount,
    Device(u32, &'static str),
    ProcessName(u32),
}

/// Calls handed to the blocking pool that have not returned yet.
#[derive(Default)]
struct InFlight {
    calls: Mutex<HashSet<Call>>,
}

impl InFlight {
    fn try_claim(self: &Arc<Self>, call: Call) -> Option<InFlightGuard> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if !calls.insert(call) {
            return None;
        }
        Some(InFlightGuard {
            owner: Arc::clone(self),
            call,
        })
    }
}

// Releases the claim when the blocking call returns, or when a task that
// never started is dropped.
struct InFlightGuard {
    owner: Arc<InFlight>,
    call: Call,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.call);
    }
}

// Runs source calls on the blocking pool, each capped by the per-query
// timeout and by the deadline of the whole cycle. A call whose previous
// instance is still stuck fails at once instead of queueing another thread.
struct Query<S> {
    source: Arc<S>,
    in_flight: Arc<InFlight>,
    per_query: Duration,
    deadline: Instant,
}

impl<S: TelemetrySource> Query<S> {
    async fn run<T, F>(&self, call: Call, f: F) -> Result<T, TelemetryError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, TelemetryError> + Send + 'static,
    {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(TelemetryError::Timeout);
        }
        let Some(guard) = self.in_flight.try_claim(call) else {
            trace!(?call, "previous call still outstanding");
            return Err(TelemetryError::Timeout);
        };
        let until = (now + self.per_query).min(self.deadline);
        let source = Arc::clone(&self.source);
        let task = spawn_blocking(move || {
            let _guard = guard;
            f(&source)
        });
        match timeout_at(until, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TelemetryError::TaskFailed(join.to_string())),
            Err(_) => Err(TelemetryError::Timeout),
        }
    }
}

fn field<T>(ordinal: u32, what: &'static str, result: Result<T, TelemetryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(ordinal, field = what, %err, "query failed, keeping default");
            None
        }
    }
}

async fn sample_device<S: TelemetrySource>(query: &Query<S>, ordinal: u32) -> Option<Sampled> {
    let handle = query.run(Call::Device(ordinal, "handle"), move |s| s.open_device(ordinal));
    if let Err(err) = handle.await {
        debug!(ordinal, %err, "device handle unavailable, skipping this cycle");
        return None;
    }

    let (uuid, name, util, temp, fan, power, limit, core_clock, mem_clock, memory, procs) = tokio::join!(
        query.run(Call::Device(ordinal, "uuid"), move |s| s.uuid(ordinal)),
        query.run(Call::Device(ordinal, "name"), move |s| s.name(ordinal)),
        query.run(Call::Device(ordinal, "utilization"), move |s| s.utilization(ordinal)),
        query.run(Call::Device(ordinal, "temperature"), move |s| s.temperature(ordinal)),
        query.run(Call::Device(ordinal, "fan_speed"), move |s| s.fan_speed(ordinal)),
        query.run(Call::Device(ordinal, "power_usage"), move |s| s.power_usage(ordinal)),
        query.run(Call::Device(ordinal, "power_limit"), move |s| s.power_limit(ordinal)),
        query.run(Call::Device(ordinal, "core_clock"), move |s| {
            s.clock(ordinal, ClockDomain::Graphics)
        }),
        query.run(Call::Device(ordinal, "mem_clock"), move |s| {
            s.clock(ordinal, ClockDomain::Memory)
        }),
        query.run(Call::Device(ordinal, "memory"), move |s| s.memory(ordinal)),
        query.run(Call::Device(ordinal, "compute_processes"), move |s| {
            s.compute_processes(ordinal)
        }),
    );

    let mut snapshot = DeviceSnapshot::empty(ordinal);
    if let Some(name) = field(ordinal, "name", name) {
        snapshot.name = name;
    }
    if let Some(util) = field(ordinal, "utilization", util) {
        snapshot.set_utilization(util);
    }
    if let Some(temp) = field(ordinal, "temperature", temp) {
        snapshot.temperature_celsius = temp;
    }
    if let Some(fan) = field(ordinal, "fan_speed", fan) {
        snapshot.fan_speed_percent = fan;
    }
    if let Some(mw) = field(ordinal, "power_usage", power) {
        snapshot.set_power_milliwatts(mw);
    }
    if let Some(mw) = field(ordinal, "power_limit", limit) {
        snapshot.set_power_limit_milliwatts(mw);
    }
    if let Some(mhz) = field(ordinal, "core_clock", core_clock) {
        snapshot.core_clock_mhz = mhz;
    }
    if let Some(mhz) = field(ordinal, "mem_clock", mem_clock) {
        snapshot.mem_clock_mhz = mhz;
    }
    if let Some(memory) = field(ordinal, "memory", memory) {
        snapshot.set_memory(memory);
    }

    let mut processes = Vec::new();
    for proc in field(ordinal, "compute_processes", procs).unwrap_or_default() {
        let pid = proc.pid;
        let lookup = query.run(Call::ProcessName(pid), move |s| s.process_name(pid));
        let name = match lookup.await {
            Ok(name) => name,
            Err(err) => {
                trace!(pid, %err, "process name unavailable");
                String::new()
            }
        };
        processes.push(ProcessEntry {
            device_index: ordinal,
            pid,
            name,
            memory_used_bytes: proc.used_memory.unwrap_or(0),
        });
    }

    Some(Sampled {
        ordinal,
        uuid: field(ordinal, "uuid", uuid),
        snapshot,
        processes,
    })
}
