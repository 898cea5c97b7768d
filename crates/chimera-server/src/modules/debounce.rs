use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct LastPublication {
    detected: bool,
    at: Instant,
}

/// Redundancy filter for a detection stream
///
/// A result is published when nothing has been published yet, when the
/// detected state differs from the last publication, or when at least
/// `interval` has passed since it.
#[derive(Debug)]
pub struct Debounce {
    interval: Duration,
    last: Option<LastPublication>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn should_publish(&self, detected: bool, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) if last.detected != detected => true,
            Some(last) => now.saturating_duration_since(last.at) >= self.interval,
        }
    }

    pub fn record(&mut self, detected: bool, now: Instant) {
        self.last = Some(LastPublication { detected, at: now });
    }

    /// Forget the last publication; the next result always publishes.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Detected state of the last publication, `None` before the first one
    pub fn last_state(&self) -> Option<bool> {
        self.last.map(|last| last.detected)
    }
}
