use crate::Collector;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const LATE_TICK_TOLERANCE: Duration = Duration::from_millis(250);

/// Fires a collector at a fixed interval, one cycle at a time.
pub struct Scheduler {
    interval: Duration,
    grace: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self { interval, grace }
    }

    /// Runs until `shutdown` is cancelled and returns the number of cycles
    /// started. The first cycle starts immediately. Ticks missed while a
    /// cycle overruns are skipped. A cycle still running at shutdown gets
    /// the grace period to finish and is dropped after it.
    pub async fn run<C: Collector + ?Sized>(
        &self,
        collector: &mut C,
        shutdown: CancellationToken,
    ) -> u64 {
        tracing::info!(
            collector = collector.name(),
            interval_secs = self.interval.as_secs(),
            "Collection scheduler started"
        );

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut started = 0u64;

        loop {
            let scheduled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                at = tick.tick() => at,
            };
            // An overdue tick is handed out once after an overrun; drop it and
            // wait for the next aligned one.
            if scheduled.elapsed() > LATE_TICK_TOLERANCE {
                tracing::debug!(
                    late_ms = scheduled.elapsed().as_millis() as u64,
                    "Skipping missed tick"
                );
                continue;
            }

            started += 1;
            let cycle_start = Instant::now();
            let mut cycle = collector.collect();

            let interrupted = tokio::select! {
                outcome = &mut cycle => {
                    tracing::trace!(outcome = ?outcome, "Cycle finished");
                    false
                }
                _ = shutdown.cancelled() => true,
            };

            if interrupted {
                tracing::info!(
                    grace_secs = self.grace.as_secs(),
                    "Shutdown requested, waiting for in-flight cycle"
                );
                if tokio::time::timeout(self.grace, cycle).await.is_err() {
                    tracing::warn!("In-flight cycle did not finish within the grace period, aborted");
                }
                break;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed > self.interval {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_secs = self.interval.as_secs(),
                    "Collection cycle overran its interval, skipping missed ticks"
                );
            }
        }

        collector.shutdown().await;
        tracing::info!(cycles = started, "Collection scheduler stopped");
        started
    }
}
