//! Sampling loop: telemetry -> SignalFrame -> engine tick, plus the periodic
//! snapshot flush and changeover backfill dispatch.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::guard::guarded;
use super::PipelineContext;
use crate::acquisition::{SignalSampler, WarnThrottle};
use crate::engine::TickOutcome;
use crate::types::BackfillRequest;

pub struct SamplingLoop {
    ctx: PipelineContext,
    sampler: SignalSampler,
    throttle: WarnThrottle,
    flush_every: Duration,
    last_flush: Option<DateTime<Utc>>,
    ticks: u64,
}

impl SamplingLoop {
    pub fn new(ctx: PipelineContext) -> Self {
        let intervals = &ctx.config.intervals;
        let flush_every = Duration::milliseconds(intervals.snapshot_flush_ms as i64);
        Self {
            sampler: SignalSampler::new(ctx.config.signals.clone()),
            throttle: WarnThrottle::default(),
            flush_every,
            last_flush: None,
            ticks: 0,
            ctx,
        }
    }

    /// One sampling tick at `now`. Returns the engine outcome, or `None` when
    /// the feed had nothing to offer.
    pub async fn step(&mut self, now: DateTime<Utc>) -> Option<TickOutcome> {
        let outcome = match self.ctx.telemetry.latest().await {
            Ok(Some(telemetry)) => {
                let frame = self.sampler.sample(&telemetry, now);
                let outcome = self.ctx.engine.lock().await.tick(&frame);
                self.ticks += 1;
                Some(outcome)
            }
            Ok(None) => None,
            Err(e) => {
                if self.throttle.allow(self.ctx.telemetry.source_name()) {
                    warn!(source = self.ctx.telemetry.source_name(), error = %e, "Telemetry unavailable, skipping tick");
                }
                None
            }
        };

        if let Some(request) = outcome.as_ref().and_then(|o| o.backfill) {
            self.dispatch_backfill(request);
        }

        if self.last_flush.map_or(true, |t| now - t >= self.flush_every) {
            self.flush(now).await;
            self.last_flush = Some(now);
        }
        outcome
    }

    /// Write the current snapshot document on the blocking pool. Returns
    /// false when the write failed.
    pub async fn flush(&self, now: DateTime<Utc>) -> bool {
        let snapshot = self.ctx.engine.lock().await.snapshot(now);
        let store = self.ctx.snapshot_store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, path = %self.ctx.snapshot_store.path().display(), "Snapshot write failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Snapshot writer task failed");
                false
            }
        }
    }

    /// Relabel archived rows inside a pause now known to be a changeover.
    /// Best effort: never retried and never awaited.
    fn dispatch_backfill(&self, request: BackfillRequest) {
        let archive = self.ctx.archive.clone();
        info!(start = %request.start, end = %request.end, "Pause committed as changeover, backfilling archive");
        tokio::task::spawn_blocking(move || {
            match archive.relabel_idle_as_changeover(request.start, request.end) {
                Ok(rows) => debug!(rows, "Changeover backfill applied"),
                Err(e) => warn!(error = %e, backend = archive.backend_name(), "Changeover backfill failed"),
            }
        });
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let period = StdDuration::from_millis(self.ctx.config.intervals.sample_ms);
        info!("[SamplingLoop] Task starting with interval {:?}", period);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(Utc::now()).await;
                    info!("[SamplingLoop] Received shutdown signal after {} ticks", self.ticks);
                    return Ok(());
                }
                _ = interval.tick() => {
                    guarded("SamplingLoop", self.step(Utc::now())).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::harness;
    use crate::types::{OeeSnapshot, SensorGroup, TelemetrySnapshot};
    use serde_json::json;

    fn telemetry(now: DateTime<Utc>, element: bool) -> TelemetrySnapshot {
        let mut t = TelemetrySnapshot::default();
        t.insert(
            "master1/port1",
            SensorGroup::valid_at(now)
                .with_field("machine_on", json!(true))
                .with_field("element_present", json!(element))
                .with_field("speed_pulse", json!(false)),
        );
        t.insert(
            "master1/port2",
            SensorGroup::valid_at(now)
                .with_field("length_raw", json!(5_200))
                .with_field("width_raw", json!(3_000))
                .with_field("height_raw", json!(1_050)),
        );
        t
    }

    #[tokio::test]
    async fn test_step_ticks_engine_and_flushes() {
        let t0 = Utc::now();
        let h = harness(t0);
        let mut sampling = SamplingLoop::new(h.ctx.clone());

        assert!(sampling.step(t0).await.is_none(), "no telemetry yet");
        assert!(h.ctx.snapshot_store.path().exists(), "first step always flushes");

        h.telemetry.set(Some(telemetry(t0, true)));
        let outcome = sampling.step(t0 + Duration::milliseconds(50)).await.unwrap();
        assert!(outcome.rising_edge);
        assert!(outcome.rate_changed);

        h.telemetry.set(Some(telemetry(t0, false)));
        sampling.step(t0 + Duration::milliseconds(1_100)).await;
        let persisted: OeeSnapshot = h.ctx.snapshot_store.load().unwrap();
        assert_eq!(persisted.oee.element_count, 1);
        assert_eq!(persisted.product.rate, 15.0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_failed_flush_keeps_sampling() {
        let t0 = Utc::now();
        let h = harness(t0);
        // a directory where the snapshot file should go makes every save fail
        std::fs::create_dir_all(h.ctx.snapshot_store.path()).unwrap();
        let mut sampling = SamplingLoop::new(h.ctx.clone());

        assert!(!sampling.flush(t0).await);
        h.telemetry.set(Some(telemetry(t0, true)));
        let outcome = sampling.step(t0 + Duration::milliseconds(50)).await.unwrap();
        assert!(outcome.rising_edge);
        assert_eq!(h.ctx.engine.lock().await.element_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_flush_writes_from_single_threaded_runtime() {
        let t0 = Utc::now();
        let h = harness(t0);
        let sampling = SamplingLoop::new(h.ctx.clone());
        assert!(sampling.flush(t0).await);
        let persisted: OeeSnapshot = h.ctx.snapshot_store.load().unwrap();
        assert_eq!(persisted.oee.element_count, 0);
    }
}
