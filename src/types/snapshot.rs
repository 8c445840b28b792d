//! Persisted OEE snapshot document and the archive row derived from it.
//!
//! The snapshot is the only recovery vector on restart, so every field
//! defaults when missing and a partially repaired document still loads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::cycle::{CyclePeriod, OpenCyclePeriod, PauseInterval};
use crate::config::defaults::SNAPSHOT_VERSION;

/// Consolidated view of the engine state plus computed ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub oee: OeeSection,
    #[serde(default)]
    pub product: ProductSection,
    #[serde(default)]
    pub internal: InternalSection,
    #[serde(default)]
    pub helpers_air: AirHelpers,
    #[serde(default)]
    pub helpers_energy: EnergyHelpers,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Default for OeeSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: epoch(),
            oee: OeeSection::default(),
            product: ProductSection::default(),
            internal: InternalSection::default(),
            helpers_air: AirHelpers::default(),
            helpers_energy: EnergyHelpers::default(),
        }
    }
}

/// Cumulative shift figures and ratios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OeeSection {
    pub measured_secs: f64,
    pub work_secs: f64,
    pub idle_secs: f64,
    pub changeover_secs: f64,
    pub element_count: u64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    /// Energy used since the shift baseline (W-scaled counter units)
    pub energy_w: f64,
    /// Air used since the shift baseline (m³)
    pub air_m3: f64,
    pub energy_per_piece_w: f64,
    pub air_per_piece_m3: f64,
    /// Lagging dashboard estimates
    pub availability_live: f64,
    pub performance_live: f64,
    pub oee_live: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductSection {
    pub length_calc: f64,
    pub width_calc: f64,
    pub height_calc: f64,
    pub rule: String,
    pub rate: f64,
}

impl Default for ProductSection {
    fn default() -> Self {
        Self {
            length_calc: 0.0,
            width_calc: 0.0,
            height_calc: 0.0,
            rule: super::cycle::DEFAULT_RATE_LABEL.to_string(),
            rate: 0.0,
        }
    }
}

/// Engine bookkeeping needed to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalSection {
    pub start_measurement: Option<DateTime<Utc>>,
    pub element_last_time: Option<DateTime<Utc>>,
    pub first_element_seen: bool,
    /// Signal levels on the last tick, for edge detection across restarts
    pub prev_element: bool,
    pub prev_speed: bool,
    pub machine_on: bool,
    pub working: bool,
    pub paused: bool,
    pub committed_idle_secs: f64,
    pub changeover_temp_secs: f64,
    pub pause: Option<PauseInterval>,
    pub count_at_last_resume: u64,
    pub rotary_speed_rpm: f64,
    pub last_work_tick: Option<DateTime<Utc>>,
    pub open_period: Option<OpenCyclePeriod>,
    pub cycle_history: Vec<CyclePeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirHelpers {
    /// Sum of the per-port baselines
    pub baseline_m3: Option<f64>,
    /// Shift baseline per flow port, m³
    pub baselines_m3: BTreeMap<String, f64>,
    pub factor: f64,
    pub total_raw: f64,
    pub total_m3: f64,
    /// Raw totaliser per flow port
    pub ports: BTreeMap<String, f64>,
}

impl Default for AirHelpers {
    fn default() -> Self {
        Self {
            baseline_m3: None,
            baselines_m3: BTreeMap::new(),
            factor: crate::config::defaults::AIR_FACTOR,
            total_raw: 0.0,
            total_m3: 0.0,
            ports: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyHelpers {
    pub baseline_w: Option<f64>,
    /// Shift baseline per analyzer device
    pub baselines_w: BTreeMap<String, f64>,
    pub total_w: f64,
    /// Energy counter per analyzer device (W-scaled)
    pub devices: BTreeMap<String, f64>,
}

// ============================================================================
// Archive Row
// ============================================================================

/// Flat row written to the archive sink every archive interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeSample {
    pub timestamp: DateTime<Utc>,
    pub rotary_speed_rpm: f64,
    pub measured_secs: f64,
    pub work_secs: f64,
    pub idle_secs: f64,
    pub changeover_secs: f64,
    pub changeover_temp_secs: f64,
    pub machine_on: bool,
    pub working: bool,
    pub element_count: u64,
    pub length_calc: f64,
    pub width_calc: f64,
    pub height_calc: f64,
    pub rate: f64,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub energy_per_piece_w: f64,
    pub air_per_piece_m3: f64,
}

impl From<&OeeSnapshot> for OeeSample {
    fn from(s: &OeeSnapshot) -> Self {
        Self {
            timestamp: s.timestamp,
            rotary_speed_rpm: s.internal.rotary_speed_rpm,
            measured_secs: s.oee.measured_secs,
            work_secs: s.oee.work_secs,
            idle_secs: s.oee.idle_secs,
            changeover_secs: s.oee.changeover_secs,
            changeover_temp_secs: s.internal.changeover_temp_secs,
            machine_on: s.internal.machine_on,
            working: s.internal.working,
            element_count: s.oee.element_count,
            length_calc: s.product.length_calc,
            width_calc: s.product.width_calc,
            height_calc: s.product.height_calc,
            rate: s.product.rate,
            availability: s.oee.availability,
            performance: s.oee.performance,
            quality: s.oee.quality,
            oee: s.oee.oee,
            energy_per_piece_w: s.oee.energy_per_piece_w,
            air_per_piece_m3: s.oee.air_per_piece_m3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_document_loads_with_defaults() {
        let json = r#"{"oee": {"element_count": 42, "idle_secs": 12.5}}"#;
        let snap: OeeSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.oee.element_count, 42);
        assert!((snap.helpers_air.factor - 1.0).abs() < f64::EPSILON);
        assert!(snap.internal.pause.is_none());
    }

    #[test]
    fn test_top_level_sections_present() {
        let value = serde_json::to_value(OeeSnapshot::default()).unwrap();
        for key in ["oee", "product", "internal", "helpers_air", "helpers_energy"] {
            assert!(value.get(key).is_some(), "missing section {key}");
        }
    }
}
