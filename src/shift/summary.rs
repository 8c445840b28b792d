//! Shift summary assembly.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use crate::types::{OeeSnapshot, ResourceUsage, ShiftOeeTotals, ShiftSummary, ShiftWindow};

/// Everything a summary is built from, gathered at the boundary.
#[derive(Debug, Clone)]
pub struct SummaryInputs<'a> {
    pub line: &'a str,
    pub window: ShiftWindow,
    pub created_at: DateTime<Utc>,
    pub snapshot: &'a OeeSnapshot,
    pub elements_per_rate: BTreeMap<String, u64>,
    pub energy: ResourceUsage,
    pub air: ResourceUsage,
    /// Register values per analyzer device at the boundary
    pub analyzers: BTreeMap<String, BTreeMap<String, f64>>,
}

pub fn build_summary(inputs: SummaryInputs<'_>) -> ShiftSummary {
    let oee = &inputs.snapshot.oee;
    let totals = ShiftOeeTotals {
        measured_secs: oee.measured_secs,
        work_secs: oee.work_secs,
        idle_secs: oee.idle_secs,
        changeover_secs: oee.changeover_secs,
        element_count: oee.element_count,
        availability: oee.availability,
        performance: oee.performance,
        quality: oee.quality,
        oee: oee.oee,
        energy_per_piece_w: inputs.energy.per_piece,
        air_per_piece_m3: inputs.air.per_piece,
    };

    let attributed: u64 = inputs.elements_per_rate.values().sum();
    if totals.element_count > 0 && attributed != totals.element_count {
        warn!(
            attributed,
            element_count = totals.element_count,
            "Per-rate element breakdown does not match the shift total"
        );
    }

    ShiftSummary {
        line: inputs.line.to_string(),
        created_at: inputs.created_at,
        window: inputs.window,
        oee: totals,
        elements_per_rate: inputs.elements_per_rate,
        energy: inputs.energy,
        air: inputs.air,
        analyzers: inputs.analyzers,
    }
}
