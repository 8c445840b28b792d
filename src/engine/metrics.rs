//! OEE figures: cumulative availability/performance/quality, and the lagging
//! live estimator used by dashboards.

use serde::{Deserialize, Serialize};

use super::classifier::TimeBuckets;
use crate::types::{expected_elements, CyclePeriod, OeeSnapshot, OpenCyclePeriod};

/// Quality is fixed; no defect signal is wired to the line.
pub const QUALITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OeeFigures {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

impl OeeFigures {
    /// Clamp the inputs to [0, 1] and derive OEE rounded to 4 decimals.
    pub fn from_parts(availability: f64, performance: f64, quality: f64) -> Self {
        let availability = clamp01(availability);
        let performance = clamp01(performance);
        let quality = clamp01(quality);
        Self {
            availability,
            performance,
            quality,
            oee: clamp01(round4(availability * performance * quality)),
        }
    }
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// NaN maps to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn availability(b: &TimeBuckets) -> f64 {
    if b.measured <= 0.0 {
        return 0.0;
    }
    clamp01(round4((b.measured - b.idle - b.changeover) / b.measured))
}

/// Actual over expected elements across closed periods and the open one.
///
/// `pending_work_secs` is work time elapsed since the last classifier tick,
/// added to the open period.
pub fn performance(history: &[CyclePeriod], open: &OpenCyclePeriod, pending_work_secs: f64) -> f64 {
    let mut expected = 0.0;
    let mut actual = 0.0;

    for p in history {
        let e = p.expected_elements();
        if e > 0.0 {
            expected += e;
            actual += p.element_count as f64;
        }
    }

    let open_expected = expected_elements(open.rate, open.work_secs + pending_work_secs.max(0.0));
    if open_expected > 0.0 {
        expected += open_expected;
        actual += open.element_count as f64;
    }

    if expected <= 0.0 {
        return 0.0;
    }
    clamp01(round4(actual / expected))
}

// ============================================================================
// Live Estimator
// ============================================================================

/// Lagging availability/performance estimate from two consecutive reads of
/// the persisted snapshot.
/// Inputs are the persisted document, never the in-memory state, so the
/// estimate lags the engine by up to one flush interval.
#[derive(Debug, Clone, Default)]
pub struct LiveEstimator {
    last_measured: f64,
    last_unproductive: f64,
    last_count: u64,
    availability: f64,
    performance: f64,
}

impl LiveEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Availability over the window since the previous read.
    ///
    /// A snapshot that has not advanced (or went backwards after a reset)
    /// yields zero, not an error.
    pub fn observe_availability(&mut self, snapshot: &OeeSnapshot) {
        let measured = snapshot.oee.measured_secs;
        let unproductive = snapshot.oee.idle_secs + snapshot.oee.changeover_secs;
        let d_measured = measured - self.last_measured;
        let d_unproductive = unproductive - self.last_unproductive;

        self.availability = if d_measured <= 0.0 {
            0.0
        } else {
            (d_measured - d_unproductive) / d_measured
        };
        self.last_measured = measured;
        self.last_unproductive = unproductive;
    }

    /// Performance over the window since the previous read.
    ///
    /// `rate` is the live production rate; `rate_just_changed` skips the tick
    /// entirely so the window straddling a rate change is never reported.
    pub fn observe_performance(
        &mut self,
        snapshot: &OeeSnapshot,
        rate: f64,
        interval_secs: f64,
        rate_just_changed: bool,
    ) {
        if rate_just_changed {
            return;
        }

        let count = snapshot.oee.element_count;
        // counter going backwards is a restart artifact
        let delta = count.saturating_sub(self.last_count);
        self.last_count = count;

        let expected = if snapshot.internal.working && rate > 0.0 {
            rate / 60.0 * interval_secs
        } else {
            0.0
        };
        self.performance = if expected <= 0.0 { 0.0 } else { delta as f64 / expected };
    }

    pub fn figures(&self) -> OeeFigures {
        OeeFigures::from_parts(round4(self.availability), round4(self.performance), QUALITY)
    }
}
