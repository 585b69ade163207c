//! The producer side: a dedicated thread that runs one poll cycle per tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::monitor::Sampler;
use crate::source::TelemetrySource;

/// Polls a [`Sampler`] at a fixed interval until stopped or dropped.
///
/// The first cycle runs immediately. Stopping never interrupts a cycle in
/// flight; it waits for it, which is bounded by the sampler's poll budget.
pub struct Poller {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    /// `runtime` provides the blocking pool and timers for the driver
    /// queries. `on_update` runs after every published cycle.
    pub fn spawn<S, F>(
        sampler: Arc<Sampler<S>>,
        runtime: Handle,
        interval: Duration,
        on_update: F,
    ) -> std::io::Result<Self>
    where
        S: TelemetrySource,
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("rgm-poller".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    runtime.block_on(sampler.poll());
                    on_update();
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {}
                    }
                }
                debug!("poller thread exiting");
            })?;
        info!(?interval, "poller started");
        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stops scheduling polls and waits for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel, which also wakes the
        // select if the send was skipped.
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("poller thread panicked");
            }
            info!("poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
