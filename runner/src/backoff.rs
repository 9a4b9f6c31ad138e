use std::{thread, time::Duration};
use tracing::debug;

/// upper bound of a single wait, in time units
pub const MAX_BACKOFF_UNITS: u32 = 600;

/// Exponential back-off starting at one time unit, doubling up to `MAX_BACKOFF_UNITS`
#[derive(Debug, Clone)]
pub struct Backoff {
    unit: Duration,
    units: u32,
}

impl Backoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit, units: 1 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.unit * self.units;
        self.units = (self.units * 2).min(MAX_BACKOFF_UNITS);

        delay
    }

    /// Sleep for the next delay, one unit at a time, returning early once `stop` holds
    pub fn wait_unless(&mut self, stop: impl Fn() -> bool) {
        let delay = self.next_delay();
        debug!("waiting {delay:?}...");

        let mut slept = Duration::ZERO;
        while slept < delay && !stop() {
            let slice = self.unit.min(delay - slept);
            thread::sleep(slice);
            slept += slice;
        }
    }
}
