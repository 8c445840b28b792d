//! Shift window and the finalized per-shift summary.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `[start, end)` of one shift, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    /// The shift of `length` that ends at `boundary`.
    pub fn ending_at(boundary: DateTime<Utc>, length: Duration) -> Self {
        Self { start: boundary - length, end: boundary }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Start/last/delta of one cumulative external counter over a shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterDelta {
    pub start: f64,
    pub last: f64,
    pub delta: f64,
}

impl CounterDelta {
    /// Delta is clamped at zero; a counter that went backwards used nothing.
    pub fn new(start: f64, last: f64) -> Self {
        Self { start, last, delta: (last - start).max(0.0) }
    }
}

/// Per-channel counters plus totals for one resource (energy or air).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    pub channels: BTreeMap<String, CounterDelta>,
    pub total: f64,
    pub per_piece: f64,
}

impl ResourceUsage {
    pub fn from_channels(channels: BTreeMap<String, CounterDelta>, elements: u64) -> Self {
        let total: f64 = channels.values().map(|c| c.delta).sum();
        let per_piece = if elements > 0 { total / elements as f64 } else { 0.0 };
        Self { channels, total, per_piece }
    }
}

/// Shift totals copied from the snapshot at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftOeeTotals {
    pub measured_secs: f64,
    pub work_secs: f64,
    pub idle_secs: f64,
    pub changeover_secs: f64,
    pub element_count: u64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub energy_per_piece_w: f64,
    pub air_per_piece_m3: f64,
}

/// Finalized record of one shift. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummary {
    pub line: String,
    pub created_at: DateTime<Utc>,
    pub window: ShiftWindow,
    #[serde(default)]
    pub oee: ShiftOeeTotals,
    /// Rate label -> elements produced under that rate
    #[serde(default)]
    pub elements_per_rate: BTreeMap<String, u64>,
    /// Energy per analyzer device, Wh
    #[serde(default)]
    pub energy: ResourceUsage,
    /// Air totaliser per flow port, m³
    #[serde(default)]
    pub air: ResourceUsage,
    /// Every numeric register per analyzer device at the boundary
    #[serde(default)]
    pub analyzers: BTreeMap<String, BTreeMap<String, f64>>,
}
