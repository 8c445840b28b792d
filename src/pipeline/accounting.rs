//! Cost loop: external energy and air counters -> cost accountant.

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::guard::guarded;
use super::PipelineContext;
use crate::acquisition::WarnThrottle;
use crate::engine::CostUpdate;

pub struct CostLoop {
    ctx: PipelineContext,
    throttle: WarnThrottle,
}

impl CostLoop {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx, throttle: WarnThrottle::default() }
    }

    pub async fn step(&mut self) -> CostUpdate {
        let reading = self.ctx.read_costs(&mut self.throttle).await;
        if reading.is_empty() {
            debug!("No energy or air data this tick, keeping previous figures");
            return CostUpdate::Skipped;
        }

        let mut engine = self.ctx.engine.lock().await;
        let update = engine.observe_costs(&reading);
        if update == CostUpdate::BaselineCaptured {
            info!(
                energy_baseline = ?engine.cost().energy_baseline(),
                air_baseline = ?engine.cost().air_baseline(),
                "Cost baseline captured"
            );
        }
        update
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let period = Duration::from_secs(self.ctx.config.intervals.cost_secs);
        info!("[CostLoop] Task starting with interval {:?}", period);

        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[CostLoop] Received shutdown signal");
                    return Ok(());
                }
                _ = interval.tick() => {
                    guarded("CostLoop", self.step()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::harness;
    use crate::types::{MeterReadings, MeterRecord};
    use chrono::Utc;
    use serde_json::json;

    fn meters(kwh: f64) -> MeterReadings {
        let mut m = MeterReadings::default();
        m.devices.insert(
            "device_1".into(),
            vec![MeterRecord {
                id: "ea_pos_total".into(),
                value: json!(kwh),
                unit: "kWh".into(),
                timestamp: Some(Utc::now()),
            }],
        );
        m
    }

    #[tokio::test]
    async fn test_baseline_then_delta_then_skip() {
        let h = harness(Utc::now());
        let mut cost = CostLoop::new(h.ctx.clone());

        assert_eq!(cost.step().await, CostUpdate::Skipped);
        h.meters.set(Some(meters(10.0)));
        assert_eq!(cost.step().await, CostUpdate::BaselineCaptured);
        h.meters.set(Some(meters(12.0)));
        assert_eq!(cost.step().await, CostUpdate::Updated);
        h.meters.set(None);
        assert_eq!(cost.step().await, CostUpdate::Skipped);

        let engine = h.ctx.engine.lock().await;
        assert!((engine.cost().energy_w() - 2_000.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reads_on_interval_until_cancelled() {
        let h = harness(Utc::now());
        h.meters.set(Some(meters(10.0)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(CostLoop::new(h.ctx.clone()).run(cancel.clone()));

        // ticks at 0 s and 10 s: baseline, then an unchanged counter
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(h.ctx.engine.lock().await.cost().energy_baseline(), Some(10_000.0));

        h.meters.set(Some(meters(12.5)));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!((h.ctx.engine.lock().await.cost().energy_w() - 2_500.0).abs() < 1e-9);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
