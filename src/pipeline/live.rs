//! Live estimator loop: reads back the persisted snapshot document and feeds
//! it to the engine's live estimator.

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::guard::guarded;
use super::PipelineContext;
use crate::types::OeeSnapshot;

pub struct LiveLoop {
    ctx: PipelineContext,
    interval_secs: f64,
}

impl LiveLoop {
    pub fn new(ctx: PipelineContext) -> Self {
        let interval_secs = ctx.config.intervals.live_estimator_secs as f64;
        Self { ctx, interval_secs }
    }

    /// Returns false when no snapshot document exists yet.
    pub async fn step(&mut self) -> bool {
        let store = self.ctx.snapshot_store.clone();
        let persisted = tokio::task::spawn_blocking(move || store.load::<OeeSnapshot>())
            .await
            .ok()
            .flatten();
        let Some(persisted) = persisted else {
            debug!("No persisted snapshot yet, live estimate unchanged");
            return false;
        };

        self.ctx.engine.lock().await.observe_live(&persisted, self.interval_secs);
        true
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let period = Duration::from_secs(self.ctx.config.intervals.live_estimator_secs);
        info!("[LiveLoop] Task starting with interval {:?}", period);

        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[LiveLoop] Received shutdown signal");
                    return Ok(());
                }
                _ = interval.tick() => {
                    guarded("LiveLoop", self.step()).await;
                }
            }
        }
    }
}
