//! Rollover loop: sleeps until the next shift boundary, then finalizes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::guard::guarded;
use super::PipelineContext;
use crate::acquisition::WarnThrottle;
use crate::config::ConfigError;
use crate::shift::{FinalizeOutcome, ShiftScheduler};

pub struct RolloverLoop {
    ctx: PipelineContext,
    scheduler: ShiftScheduler,
    throttle: WarnThrottle,
}

impl RolloverLoop {
    pub fn new(ctx: PipelineContext) -> Result<Self, ConfigError> {
        let scheduler = ShiftScheduler::new(&ctx.config, ctx.archive.clone())?;
        Ok(Self { ctx, scheduler, throttle: WarnThrottle::default() })
    }

    pub fn scheduler(&self) -> &ShiftScheduler {
        &self.scheduler
    }

    /// Close the shift ending at `boundary` using the counters readable now.
    pub async fn finalize(&mut self, boundary: DateTime<Utc>, now: DateTime<Utc>) -> FinalizeOutcome {
        let reading = self.ctx.read_costs(&mut self.throttle).await;
        self.scheduler.finalize(&self.ctx.engine, boundary, &reading, now).await
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            "[RolloverLoop] Task starting ({} boundaries in {})",
            self.ctx.config.shift.boundaries.len(),
            self.scheduler.calendar().timezone()
        );

        loop {
            let now = Utc::now();
            let boundary = self.scheduler.calendar().next_boundary(now);
            let sleep = self.scheduler.calendar().sleep_duration(now, boundary);
            info!(boundary = %boundary, sleep_secs = sleep.as_secs(), "[RolloverLoop] Waiting for shift boundary");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[RolloverLoop] Received shutdown signal");
                    return Ok(());
                }
                _ = tokio::time::sleep(sleep) => {}
            }

            // clamped sleep woke early, recompute
            if Utc::now() < boundary {
                continue;
            }

            match guarded("RolloverLoop", self.finalize(boundary, Utc::now())).await {
                Some(FinalizeOutcome::Finalized { .. }) => {}
                Some(FinalizeOutcome::SummaryFailed) => {
                    warn!(boundary = %boundary, "[RolloverLoop] Shift totals carried into the next shift");
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::harness;
    use crate::storage::ArchiveSink;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_finalize_archives_and_resets() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 12, 12, 0, 0).unwrap();
        let h = harness(t0);
        let mut rollover = RolloverLoop::new(h.ctx.clone()).unwrap();

        let boundary = rollover.scheduler().calendar().next_boundary(t0);
        assert_eq!(boundary, Utc.with_ymd_and_hms(2026, 1, 12, 13, 0, 0).unwrap());

        match rollover.finalize(boundary, boundary).await {
            FinalizeOutcome::Finalized { summary, archived } => {
                assert!(archived);
                assert_eq!(summary.window.end, boundary);
            }
            other => panic!("expected finalized shift, got {other:?}"),
        }
        assert!(h.archive.shift_summary(boundary).unwrap().is_some());

        // same boundary again: summary rewritten, archive keeps the first row
        match rollover.finalize(boundary, boundary).await {
            FinalizeOutcome::Finalized { archived, .. } => assert!(!archived),
            other => panic!("expected finalized shift, got {other:?}"),
        }
    }
}
