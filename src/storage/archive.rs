//! Archive sink: periodic OEE sample rows and one row per finished shift.
//!
//! - `SledArchive`: durable backend, one sled tree per table
//! - `InMemoryArchive`: for tests and `--data-dir`-less runs
//!
//! Keys are big-endian nanosecond timestamps so tree order is time order.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::types::{OeeSample, ShiftSummary};

const SAMPLES_TREE: &str = "oee_samples";
const SUMMARIES_TREE: &str = "shift_summaries";

/// Storage for archived samples and shift summaries.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait ArchiveSink: Send + Sync {
    /// Append one sample row (replaces a row with the same timestamp).
    fn record_sample(&self, sample: &OeeSample) -> Result<(), ArchiveError>;

    /// Sample rows with `start <= timestamp <= end`, oldest first.
    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OeeSample>, ArchiveError>;

    /// Reclassify the idle seconds recorded in `[start, end]` as changeover.
    ///
    /// Each row's changeover takes its changeover-temp value and its idle is
    /// pinned to the first row's idle. Returns the number of rows rewritten.
    fn relabel_idle_as_changeover(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, ArchiveError>;

    /// Store a finished shift. Idempotent on the shift end time; returns
    /// false when a row for that shift already exists.
    fn store_shift_summary(&self, summary: &ShiftSummary) -> Result<bool, ArchiveError>;

    fn shift_summary(&self, end: DateTime<Utc>) -> Result<Option<ShiftSummary>, ArchiveError>;

    fn latest_shift_summary(&self) -> Result<Option<ShiftSummary>, ArchiveError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("timestamp out of range: {0}")]
    TimestampRange(DateTime<Utc>),
    #[error("lock poisoned: {0}")]
    Lock(String),
}

fn time_key(t: DateTime<Utc>) -> Result<[u8; 8], ArchiveError> {
    let nanos = t.timestamp_nanos_opt().ok_or(ArchiveError::TimestampRange(t))?;
    Ok(nanos.to_be_bytes())
}

/// Rewrite rows in place for a changeover backfill.
fn relabel_rows(rows: &mut [OeeSample]) {
    let Some(first_idle) = rows.first().map(|r| r.idle_secs) else {
        return;
    };
    for row in rows.iter_mut() {
        row.changeover_secs = row.changeover_temp_secs;
        row.idle_secs = first_idle;
    }
}

// ============================================================================
// Sled
// ============================================================================

#[derive(Clone)]
pub struct SledArchive {
    db: sled::Db,
    samples: sled::Tree,
    summaries: sled::Tree,
}

impl SledArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let samples = db.open_tree(SAMPLES_TREE)?;
        let summaries = db.open_tree(SUMMARIES_TREE)?;
        info!(
            path = %path.display(),
            samples = samples.len(),
            shifts = summaries.len(),
            "Archive opened"
        );
        Ok(Self { db, samples, summaries })
    }

    pub fn flush(&self) -> Result<(), ArchiveError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl ArchiveSink for SledArchive {
    fn record_sample(&self, sample: &OeeSample) -> Result<(), ArchiveError> {
        let key = time_key(sample.timestamp)?;
        self.samples.insert(key, serde_json::to_vec(sample)?)?;
        Ok(())
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OeeSample>, ArchiveError> {
        if end < start {
            return Ok(Vec::new());
        }
        let (from, to) = (time_key(start)?, time_key(end)?);
        self.samples
            .range(from..=to)
            .map(|item| -> Result<OeeSample, ArchiveError> {
                let (_key, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn relabel_idle_as_changeover(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, ArchiveError> {
        let mut rows = self.samples_between(start, end)?;
        relabel_rows(&mut rows);

        let mut batch = sled::Batch::default();
        for row in &rows {
            batch.insert(time_key(row.timestamp)?.to_vec(), serde_json::to_vec(row)?);
        }
        self.samples.apply_batch(batch)?;
        self.samples.flush()?;
        debug!(rows = rows.len(), start = %start, end = %end, "Relabelled idle as changeover");
        Ok(rows.len())
    }

    fn store_shift_summary(&self, summary: &ShiftSummary) -> Result<bool, ArchiveError> {
        let key = time_key(summary.window.end)?;
        let value = serde_json::to_vec(summary)?;
        let inserted = self
            .summaries
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .is_ok();
        self.summaries.flush()?;
        Ok(inserted)
    }

    fn shift_summary(&self, end: DateTime<Utc>) -> Result<Option<ShiftSummary>, ArchiveError> {
        match self.summaries.get(time_key(end)?)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn latest_shift_summary(&self) -> Result<Option<ShiftSummary>, ArchiveError> {
        match self.summaries.last()? {
            Some((_key, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Not durable; data lost on restart.
#[derive(Default)]
pub struct InMemoryArchive {
    samples: RwLock<BTreeMap<DateTime<Utc>, OeeSample>>,
    summaries: RwLock<BTreeMap<DateTime<Utc>, ShiftSummary>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> ArchiveError {
    ArchiveError::Lock(e.to_string())
}

impl ArchiveSink for InMemoryArchive {
    fn record_sample(&self, sample: &OeeSample) -> Result<(), ArchiveError> {
        self.samples
            .write()
            .map_err(poisoned)?
            .insert(sample.timestamp, sample.clone());
        Ok(())
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OeeSample>, ArchiveError> {
        if end < start {
            return Ok(Vec::new());
        }
        let store = self.samples.read().map_err(poisoned)?;
        Ok(store.range(start..=end).map(|(_, s)| s.clone()).collect())
    }

    fn relabel_idle_as_changeover(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, ArchiveError> {
        if end < start {
            return Ok(0);
        }
        let mut store = self.samples.write().map_err(poisoned)?;
        let mut rows: Vec<OeeSample> = store.range(start..=end).map(|(_, s)| s.clone()).collect();
        relabel_rows(&mut rows);
        for row in &rows {
            store.insert(row.timestamp, row.clone());
        }
        Ok(rows.len())
    }

    fn store_shift_summary(&self, summary: &ShiftSummary) -> Result<bool, ArchiveError> {
        let mut store = self.summaries.write().map_err(poisoned)?;
        if store.contains_key(&summary.window.end) {
            return Ok(false);
        }
        store.insert(summary.window.end, summary.clone());
        Ok(true)
    }

    fn shift_summary(&self, end: DateTime<Utc>) -> Result<Option<ShiftSummary>, ArchiveError> {
        Ok(self.summaries.read().map_err(poisoned)?.get(&end).cloned())
    }

    fn latest_shift_summary(&self) -> Result<Option<ShiftSummary>, ArchiveError> {
        Ok(self
            .summaries
            .read()
            .map_err(poisoned)?
            .values()
            .next_back()
            .cloned())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
