use std::time::Duration;
use tokio::time::Instant;

/// Decides on each monitor tick whether a periodic sync is due.
///
/// Elapsed time is always measured from the last sync, never from process start,
/// and compared as a whole duration so intervals of any length behave the same.
pub struct SyncScheduler {
    interval: Option<Duration>,
    last_sync: Instant,
}

impl SyncScheduler {
    /// `interval` of `None` disables periodic syncing entirely.
    pub fn new(interval: Option<Duration>, now: Instant) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
            last_sync: now,
        }
    }

    /// Returns true if a sync should run now, and if so restarts the interval at `now`.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };

        let elapsed = now.saturating_duration_since(self.last_sync);
        if elapsed >= interval {
            tracing::debug!(elapsed_secs = elapsed.as_secs(), "periodic sync due");
            self.last_sync = now;
            true
        } else {
            false
        }
    }

    /// Time left until the next periodic sync, if periodic syncing is enabled.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        let interval = self.interval?;
        Some(interval.saturating_sub(now.saturating_duration_since(self.last_sync)))
    }
}
