//! Per-tick signal frame and calibrated product dimensions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;

/// One sampling tick worth of line signals.
///
/// Produced by the sampler, consumed immediately by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalFrame {
    pub timestamp: DateTime<Utc>,
    pub machine_on: bool,
    pub element_present: bool,
    pub speed_pulse: bool,
    pub length_raw: f64,
    pub width_raw: f64,
    pub height_raw: f64,
}

impl SignalFrame {
    /// All signals low, all dimensions zero.
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            machine_on: false,
            element_present: false,
            speed_pulse: false,
            length_raw: 0.0,
            width_raw: 0.0,
            height_raw: 0.0,
        }
    }
}

/// Calibrated product dimensions (millimetres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length_calc: f64,
    pub width_calc: f64,
    pub height_calc: f64,
}

impl Dimensions {
    pub fn from_frame(frame: &SignalFrame, cal: &CalibrationConfig) -> Self {
        Self {
            length_calc: frame.length_raw / cal.length_divisor + cal.length_offset,
            width_calc: frame.width_raw / cal.width_divisor + cal.width_offset,
            height_calc: frame.height_raw / cal.height_divisor + cal.height_offset,
        }
    }
}
