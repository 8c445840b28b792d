//! Shift finalization: summary, archive row, engine reset, new baselines.
//!
//! ```text
//! WAITING --boundary reached--> FINALIZING --> WAITING
//! ```
//!
//! The engine is only reset after the summary document is on disk. A failed
//! write leaves every running total in place for the next attempt.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::baselines::{CounterBaselines, CounterReadings};
use super::calendar::ShiftCalendar;
use super::summary::{build_summary, SummaryInputs};
use crate::config::{ConfigError, LineConfig};
use crate::engine::{CostReading, SharedEngine};
use crate::storage::{ArchiveSink, JsonDocumentStore};
use crate::types::ShiftSummary;

/// Result of one `ShiftScheduler::finalize` call.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// Summary written and the engine reset for the new shift
    Finalized {
        summary: Box<ShiftSummary>,
        /// False when the archive already held this shift or rejected it
        archived: bool,
    },
    /// Summary write failed; engine left untouched
    SummaryFailed,
}

pub struct ShiftScheduler {
    line: String,
    calendar: ShiftCalendar,
    air_factor: f64,
    baselines: CounterBaselines,
    summary_store: JsonDocumentStore,
    snapshot_store: JsonDocumentStore,
    archive: Arc<dyn ArchiveSink>,
}

impl ShiftScheduler {
    pub fn new(config: &LineConfig, archive: Arc<dyn ArchiveSink>) -> Result<Self, ConfigError> {
        Ok(Self {
            line: config.line.name.clone(),
            calendar: ShiftCalendar::from_config(&config.shift)?,
            air_factor: config.cost.air_factor,
            baselines: CounterBaselines::new(&config.cost),
            summary_store: JsonDocumentStore::new(config.storage.summary_path()),
            snapshot_store: JsonDocumentStore::new(config.storage.snapshot_path()),
            archive,
        })
    }

    pub fn calendar(&self) -> &ShiftCalendar {
        &self.calendar
    }

    pub fn baselines(&self) -> &CounterBaselines {
        &self.baselines
    }

    /// Last written summary: the document first, the archive second.
    /// Both are read on the blocking pool.
    pub async fn previous_summary(&self) -> Option<ShiftSummary> {
        let store = self.summary_store.clone();
        let archive = self.archive.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            if let Some(summary) = store.load::<ShiftSummary>() {
                return Some(summary);
            }
            match archive.latest_shift_summary() {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, backend = archive.backend_name(), "Could not read last archived shift");
                    None
                }
            }
        });
        match lookup.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "[ShiftScheduler] Summary lookup task failed");
                None
            }
        }
    }

    async fn write_summary(&self, summary: &ShiftSummary) -> bool {
        let store = self.summary_store.clone();
        let doc = summary.clone();
        match tokio::task::spawn_blocking(move || store.save(&doc)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(
                    error = %e,
                    path = %self.summary_store.path().display(),
                    "[ShiftScheduler] Summary write failed, engine NOT reset"
                );
                false
            }
            Err(e) => {
                error!(error = %e, "[ShiftScheduler] Summary writer task failed, engine NOT reset");
                false
            }
        }
    }

    async fn archive_summary(&self, summary: &ShiftSummary) -> bool {
        let archive = self.archive.clone();
        let row = summary.clone();
        match tokio::task::spawn_blocking(move || archive.store_shift_summary(&row)).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                warn!(end = %summary.window.end, "[ShiftScheduler] Shift already archived, keeping existing row");
                false
            }
            Ok(Err(e)) => {
                error!(error = %e, backend = self.archive.backend_name(), "[ShiftScheduler] Archive write failed");
                false
            }
            Err(e) => {
                error!(error = %e, "[ShiftScheduler] Archive writer task failed");
                false
            }
        }
    }

    /// Close the shift ending at `boundary`.
    ///
    /// `reading` is the external counter state at the boundary; channels it
    /// lacks fall back to the values last seen by the cost accountant.
    pub async fn finalize(
        &mut self,
        engine: &SharedEngine,
        boundary: DateTime<Utc>,
        reading: &CostReading,
        now: DateTime<Utc>,
    ) -> FinalizeOutcome {
        let window = self.calendar.window_ending_at(boundary);
        info!(start = %window.start, end = %window.end, "[ShiftScheduler] Finalizing shift");

        let (snapshot, elements_per_rate) = {
            let engine = engine.lock().await;
            (engine.snapshot(now), engine.elements_per_rate())
        };

        let live = CounterReadings::from_cost(reading, self.air_factor);
        let counters = live.clone().or_else(&CounterReadings::from_snapshot(&snapshot));
        let previous = self.previous_summary().await;
        let (energy, air) =
            self.baselines
                .usage(&counters, previous.as_ref(), snapshot.oee.element_count);

        let summary = build_summary(SummaryInputs {
            line: &self.line,
            window,
            created_at: now,
            snapshot: &snapshot,
            elements_per_rate,
            energy,
            air,
            analyzers: reading.analyzers.clone(),
        });

        if !self.write_summary(&summary).await {
            return FinalizeOutcome::SummaryFailed;
        }
        let archived = self.archive_summary(&summary).await;

        let fresh = {
            let mut engine = engine.lock().await;
            engine.reset(now);
            engine.observe_costs(reading);
            engine.snapshot(now)
        };
        let store = self.snapshot_store.clone();
        match tokio::task::spawn_blocking(move || store.save(&fresh)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "[ShiftScheduler] Could not write fresh snapshot after reset"),
            Err(e) => warn!(error = %e, "[ShiftScheduler] Snapshot writer task failed after reset"),
        }

        self.baselines.rebase(&live, Some(&summary));

        info!(
            elements = summary.oee.element_count,
            oee = summary.oee.oee,
            energy = summary.energy.total,
            air = summary.air.total,
            archived,
            "[ShiftScheduler] Shift closed"
        );
        FinalizeOutcome::Finalized { summary: Box::new(summary), archived }
    }
}
