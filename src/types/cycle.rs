//! Production-rate rules, cycle periods and pause bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(max_length, max_width) -> rate` entry of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleRule {
    pub max_length: f64,
    pub max_width: f64,
    /// Elements per minute
    pub rate: f64,
}

impl CycleRule {
    pub fn matches(&self, length: f64, width: f64) -> bool {
        length <= self.max_length && width <= self.max_width
    }
}

/// Label used for the configured fallback rate.
pub const DEFAULT_RATE_LABEL: &str = "default";

/// Label of the rule at `index` in the table.
pub fn rule_label(index: usize) -> String {
    format!("rule_{index}")
}

/// A closed span during which the production rate was constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rate: f64,
    pub label: String,
    pub element_count: u64,
    pub work_secs: f64,
}

impl CyclePeriod {
    /// Elements the line should have produced in the worked time.
    ///
    /// Zero for periods with a non-positive rate or no work.
    pub fn expected_elements(&self) -> f64 {
        expected_elements(self.rate, self.work_secs)
    }
}

/// The currently accumulating period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCyclePeriod {
    pub start: DateTime<Utc>,
    pub rate: f64,
    pub label: String,
    pub element_count: u64,
    pub work_secs: f64,
}

impl OpenCyclePeriod {
    pub fn new(start: DateTime<Utc>, rate: f64, label: String) -> Self {
        Self { start, rate, label, element_count: 0, work_secs: 0.0 }
    }

    pub fn close(&self, end: DateTime<Utc>) -> CyclePeriod {
        CyclePeriod {
            start: self.start,
            end,
            rate: self.rate,
            label: self.label.clone(),
            element_count: self.element_count,
            work_secs: self.work_secs,
        }
    }
}

/// Elements expected from `work_secs` of work at `rate` elements/min.
pub fn expected_elements(rate: f64, work_secs: f64) -> f64 {
    if rate <= 0.0 || work_secs <= 0.0 {
        return 0.0;
    }
    work_secs / (60.0 / rate)
}

/// An open pause. At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseInterval {
    /// Backdated start: last element time plus the idle timeout
    pub start: DateTime<Utc>,
    /// Committed idle seconds when the pause opened
    pub idle_at_start: f64,
    /// Committed changeover seconds when the pause opened
    pub changeover_at_start: f64,
    /// Element count when the pause opened
    pub element_count_at_start: u64,
    /// Resolved production rate when the pause opened
    #[serde(default)]
    pub rate_at_start: f64,
}

/// Time range whose archived rows should move from idle to changeover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_elements_skips_degenerate_periods() {
        assert!((expected_elements(12.0, 60.0) - 12.0).abs() < 1e-9);
        assert_eq!(expected_elements(0.0, 60.0), 0.0);
        assert_eq!(expected_elements(12.0, -1.0), 0.0);
    }

    #[test]
    fn test_close_keeps_counters() {
        let t0 = Utc::now();
        let mut open = OpenCyclePeriod::new(t0, 15.0, rule_label(0));
        open.element_count = 7;
        open.work_secs = 30.0;
        let closed = open.close(t0 + chrono::Duration::seconds(40));
        assert_eq!(closed.element_count, 7);
        assert_eq!(closed.label, "rule_0");
        assert!((closed.expected_elements() - 7.5).abs() < 1e-9);
    }
}
