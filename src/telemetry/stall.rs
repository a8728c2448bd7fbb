//! Scheduler stall detection.
//!
//! A probe ticks every `interval`. When a tick arrives later than the previous
//! reading plus `interval` by more than `threshold`, something held the
//! scheduler (a long synchronous section) and a diagnostic event is emitted.
//! Detection only; nothing is remediated.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{DiagnosticEvent, TelemetryEmitter, now_millis};
use crate::config::StallConfig;
use crate::metrics;

pub struct StallDetector {
    interval: Duration,
    threshold: Duration,
    previous: Instant,
}

impl StallDetector {
    pub fn new(config: &StallConfig, started: Instant) -> Self {
        Self {
            interval: config.probe_interval,
            threshold: config.threshold,
            previous: started,
        }
    }

    /// Records a probe reading taken at `now` and returns the drift if it
    /// exceeds the threshold.
    pub fn observe(&mut self, now: Instant) -> Option<Duration> {
        let expected = self.previous + self.interval;
        self.previous = now;
        let drift = now.saturating_duration_since(expected);
        (drift > self.threshold).then_some(drift)
    }

    pub fn spawn(mut self, telemetry: TelemetryEmitter, service_name: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(self.previous + self.interval, self.interval);
            // Missed ticks are the signal; never burst to catch up
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "Stall detector started"
            );

            loop {
                ticker.tick().await;
                let Some(drift) = self.observe(Instant::now()) else {
                    continue;
                };

                let drift_ms = drift.as_millis() as i64;
                let end = now_millis();
                metrics::STALLS_DETECTED_TOTAL.inc();
                tracing::debug!(drift_ms = drift_ms, "Scheduler stall detected");
                telemetry.emit(DiagnosticEvent::span(
                    end - drift_ms,
                    end,
                    format!("{}: event loop blocked for {}ms", service_name, drift_ms),
                ));
            }
        })
    }
}
