// Sampling scheduler - cheap recurring checks that commit on bucket boundaries
use crate::application::clock::{Clock, DAY, bucket_index};
use crate::application::telemetry_store::TelemetryStore;
use crate::infrastructure::config::SamplingSettings;
use rand::Rng;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct SamplingScheduler {
    fine_interval: Duration,
    tick: Duration,
    coarse_check: Duration,
}

impl SamplingScheduler {
    pub fn new(settings: &SamplingSettings) -> Self {
        Self {
            fine_interval: settings.fine_interval(),
            tick: settings.tick(),
            coarse_check: settings.coarse_check(),
        }
    }

    /// Commit a fine sample for every region if the wall clock entered a new bucket.
    ///
    /// Safe to call as often as the ticker fires; extra calls within one bucket are no-ops.
    pub fn check_fine<R: Rng + ?Sized>(&self, store: &mut TelemetryStore, clock: &dyn Clock, rng: &mut R) -> bool {
        let now = clock.now();
        let bucket = bucket_index(now, self.fine_interval);
        let committed = store.commit_fine(bucket, now, rng);
        if committed {
            tracing::debug!(bucket, regions = store.len(), "Committed fine telemetry sample");
        }
        committed
    }

    /// Same as [`check_fine`](Self::check_fine) for the daily vegetation series.
    pub fn check_coarse<R: Rng + ?Sized>(&self, store: &mut TelemetryStore, clock: &dyn Clock, rng: &mut R) -> bool {
        let now = clock.now();
        let day = bucket_index(now, DAY);
        let committed = store.commit_coarse(day, now, rng);
        if committed {
            tracing::info!(day, regions = store.len(), "Committed daily vegetation sample");
        }
        committed
    }

    /// Ticker for the fine check. Missed ticks are skipped, not replayed.
    pub fn fine_ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Ticker for the daily check; its first tick fires immediately as the startup check.
    pub fn coarse_ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.coarse_check);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}
