//! Archive loop: one flat sample row per archive interval.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::guard::guarded;
use super::PipelineContext;
use crate::types::OeeSample;

pub struct ArchiveLoop {
    ctx: PipelineContext,
    rows: u64,
}

impl ArchiveLoop {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx, rows: 0 }
    }

    pub async fn step(&mut self, now: DateTime<Utc>) -> Result<()> {
        let sample = {
            let engine = self.ctx.engine.lock().await;
            OeeSample::from(&engine.snapshot(now))
        };
        let archive = self.ctx.archive.clone();
        tokio::task::spawn_blocking(move || archive.record_sample(&sample))
            .await
            .context("archive writer task failed")?
            .context("failed to record OEE sample")?;
        self.rows += 1;
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let period = Duration::from_secs(self.ctx.config.intervals.archive_secs);
        info!(
            "[ArchiveLoop] Task starting with interval {:?} ({})",
            period,
            self.ctx.archive.backend_name()
        );

        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[ArchiveLoop] Received shutdown signal after {} rows", self.rows);
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Some(Err(e)) = guarded("ArchiveLoop", self.step(Utc::now())).await {
                        warn!("[ArchiveLoop] {:#}", e);
                    }
                }
            }
        }
    }
}
