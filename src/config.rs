//! Fixed tunables. Sampling cadence and window size are deliberately not
//! user-configurable.

use std::time::Duration;

/// Interval between two poll cycles.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshots retained per device: 2 minutes at 1 s sampling.
pub const HISTORY_CAPACITY: usize = 120;

/// Upper bound for a single driver or OS query.
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound for a whole poll cycle. Queries started after this are failed
/// without being issued.
pub const POLL_BUDGET: Duration = Duration::from_millis(800);

/// How long the runtime may wait for stuck driver calls on exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Initial window size.
pub const WINDOW_SIZE: [f32; 2] = [1024.0, 768.0];

/// Timeout policy applied to every query of a poll cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryTimeouts {
    pub per_query: Duration,
    pub per_poll: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            per_query: QUERY_TIMEOUT,
            per_poll: POLL_BUDGET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_budget_fits_inside_interval() {
        let t = QueryTimeouts::default();
        assert!(t.per_query <= t.per_poll);
        assert!(t.per_poll < POLL_INTERVAL);
    }
}
