//! Task Pipeline
//!
//! ```text
//! SamplingLoop   every sample_ms     feed -> sampler -> engine.tick, snapshot flush, backfill
//! CostLoop       every cost_secs     meters + totalisers -> cost accountant
//! LiveLoop       every live_secs     persisted snapshot -> live estimator
//! ArchiveLoop    every archive_secs  engine snapshot -> archive sample row
//! RolloverLoop   at shift boundary   summary -> archive -> reset -> new baselines
//! ```
//!
//! Every loop copies what it needs out of the engine under the lock and does
//! its I/O after releasing it. Each iteration runs inside `guard::guarded`.

pub mod accounting;
pub mod archiving;
pub mod guard;
pub mod live;
pub mod rollover;
pub mod sampling;

pub use accounting::CostLoop;
pub use archiving::ArchiveLoop;
pub use live::LiveLoop;
pub use rollover::RolloverLoop;
pub use sampling::SamplingLoop;

use std::sync::Arc;
use tracing::warn;

use crate::acquisition::{MeterFeed, TelemetryFeed, WarnThrottle};
use crate::config::LineConfig;
use crate::engine::cost::{read_air, read_analyzers, read_energy};
use crate::engine::{CostReading, SharedEngine};
use crate::storage::{ArchiveSink, JsonDocumentStore};

/// Everything the task loops share.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<LineConfig>,
    pub engine: SharedEngine,
    pub telemetry: Arc<dyn TelemetryFeed>,
    pub meters: Arc<dyn MeterFeed>,
    pub archive: Arc<dyn ArchiveSink>,
    pub snapshot_store: JsonDocumentStore,
}

impl PipelineContext {
    pub fn new(
        config: Arc<LineConfig>,
        engine: SharedEngine,
        telemetry: Arc<dyn TelemetryFeed>,
        meters: Arc<dyn MeterFeed>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Self {
        let snapshot_store = JsonDocumentStore::new(config.storage.snapshot_path());
        Self { config, engine, telemetry, meters, archive, snapshot_store }
    }

    /// Current energy and air counters plus the analyzer registers. Feed
    /// failures leave that side empty.
    pub async fn read_costs(&self, throttle: &mut WarnThrottle) -> CostReading {
        let cost = &self.config.cost;

        let (energy, analyzers) = match self.meters.latest().await {
            Ok(Some(meters)) => (read_energy(&meters, cost, throttle), read_analyzers(&meters, cost)),
            Ok(None) => (None, Default::default()),
            Err(e) => {
                if throttle.allow(self.meters.source_name()) {
                    warn!(source = self.meters.source_name(), error = %e, "Meter feed unavailable");
                }
                (None, Default::default())
            }
        };

        let air = match self.telemetry.latest().await {
            Ok(Some(telemetry)) => read_air(&telemetry, cost, throttle),
            Ok(None) => None,
            Err(e) => {
                if throttle.allow(self.telemetry.source_name()) {
                    warn!(source = self.telemetry.source_name(), error = %e, "Telemetry feed unavailable");
                }
                None
            }
        };

        CostReading { energy, air, analyzers }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::acquisition::StaticFeed;
    use crate::engine::OeeEngine;
    use crate::storage::InMemoryArchive;
    use crate::types::{MeterReadings, TelemetrySnapshot};
    use chrono::{DateTime, Utc};

    pub struct Harness {
        pub ctx: PipelineContext,
        pub telemetry: Arc<StaticFeed<TelemetrySnapshot>>,
        pub meters: Arc<StaticFeed<MeterReadings>>,
        pub archive: Arc<InMemoryArchive>,
        pub _dir: tempfile::TempDir,
    }

    pub fn harness(now: DateTime<Utc>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LineConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let config = Arc::new(config);

        let telemetry: Arc<StaticFeed<TelemetrySnapshot>> = Arc::new(StaticFeed::new(None));
        let meters: Arc<StaticFeed<MeterReadings>> = Arc::new(StaticFeed::new(None));
        let archive = Arc::new(InMemoryArchive::new());
        let engine = OeeEngine::new(&config, now).into_shared();
        let ctx = PipelineContext::new(
            config,
            engine,
            telemetry.clone(),
            meters.clone(),
            archive.clone(),
        );
        Harness { ctx, telemetry, meters, archive, _dir: dir }
    }
}
