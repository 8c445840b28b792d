//! Cycle-rate resolver: product dimensions -> production rate, plus the
//! cycle-period history that performance is computed from.
//!
//! Each rate change closes the open period at `now` and opens a new one at
//! the same instant, so history is contiguous and non-overlapping by
//! construction.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::CycleConfig;
use crate::types::{
    rule_label, CyclePeriod, CycleRule, Dimensions, OpenCyclePeriod, DEFAULT_RATE_LABEL,
};

/// Resolved rate and the label of the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    pub rate: f64,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct CycleRateResolver {
    rules: Vec<CycleRule>,
    default_rate: f64,
    epsilon: f64,
    open: OpenCyclePeriod,
    history: Vec<CyclePeriod>,
    /// Reference point for work-second accrual
    work_clock: DateTime<Utc>,
    rate_just_changed: bool,
}

impl CycleRateResolver {
    pub fn new(config: &CycleConfig, now: DateTime<Utc>) -> Self {
        Self {
            rules: config.rules.clone(),
            default_rate: config.default_rate,
            epsilon: config.rate_epsilon,
            open: OpenCyclePeriod::new(now, config.default_rate, DEFAULT_RATE_LABEL.to_string()),
            history: Vec::new(),
            work_clock: now,
            rate_just_changed: false,
        }
    }

    /// First rule with `length <= max_length && width <= max_width`, else the default.
    pub fn resolve(&self, dims: &Dimensions) -> ResolvedRate {
        self.rules
            .iter()
            .position(|r| r.matches(dims.length_calc, dims.width_calc))
            .map_or_else(
                || ResolvedRate { rate: self.default_rate, label: DEFAULT_RATE_LABEL.to_string() },
                |i| ResolvedRate { rate: self.rules[i].rate, label: rule_label(i) },
            )
    }

    /// Resolve the rate for `dims`; on a change beyond epsilon, close the open
    /// period and start a new one. Returns true when a period was closed.
    pub fn update(&mut self, dims: &Dimensions, now: DateTime<Utc>) -> bool {
        let resolved = self.resolve(dims);
        if (resolved.rate - self.open.rate).abs() <= self.epsilon {
            return false;
        }

        // a clock step backwards must not produce an inverted period
        let end = now.max(self.open.start);
        self.history.push(self.open.close(end));
        self.open = OpenCyclePeriod::new(end, resolved.rate, resolved.label);
        self.work_clock = end;
        self.rate_just_changed = true;
        true
    }

    pub fn record_element(&mut self) {
        self.open.element_count += 1;
    }

    /// Add the wall-clock delta since the previous call to the open period
    /// when `working`. Negative deltas count as zero.
    pub fn accrue_work(&mut self, now: DateTime<Utc>, working: bool) {
        let dt = seconds_between(self.work_clock, now);
        if working {
            self.open.work_secs += dt;
        }
        self.work_clock = now;
    }

    /// Work seconds not yet accrued (time since the last tick) if working.
    pub fn pending_work_secs(&self, now: DateTime<Utc>, working: bool) -> f64 {
        if working {
            seconds_between(self.work_clock, now)
        } else {
            0.0
        }
    }

    /// Consume the rate-change flag.
    pub fn take_rate_changed(&mut self) -> bool {
        std::mem::take(&mut self.rate_just_changed)
    }

    pub fn rate_changed_pending(&self) -> bool {
        self.rate_just_changed
    }

    pub fn current_rate(&self) -> f64 {
        self.open.rate
    }

    pub fn current_label(&self) -> &str {
        &self.open.label
    }

    pub fn open_period(&self) -> &OpenCyclePeriod {
        &self.open
    }

    pub fn history(&self) -> &[CyclePeriod] {
        &self.history
    }

    pub fn work_clock(&self) -> DateTime<Utc> {
        self.work_clock
    }

    /// Elements per rate label across closed periods and the open one.
    pub fn elements_per_label(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        let open = std::iter::once((&self.open.label, self.open.element_count));
        for (label, count) in self
            .history
            .iter()
            .map(|p| (&p.label, p.element_count))
            .chain(open)
        {
            *out.entry(label.clone()).or_insert(0) += count;
        }
        out
    }

    /// Rebuild from persisted state.
    pub fn restore(
        &mut self,
        open: OpenCyclePeriod,
        history: Vec<CyclePeriod>,
        work_clock: DateTime<Utc>,
    ) {
        self.open = open;
        self.history = history;
        self.work_clock = work_clock;
        self.rate_just_changed = false;
    }
}

/// Seconds from `from` to `to`, clamped at zero.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let ms = (to - from).num_milliseconds();
    if ms <= 0 {
        0.0
    } else {
        ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> CycleConfig {
        CycleConfig {
            default_rate: 14.0,
            rate_epsilon: 0.01,
            rules: vec![
                CycleRule { max_length: 600.0, max_width: 9_999.0, rate: 15.0 },
                CycleRule { max_length: 800.0, max_width: 9_999.0, rate: 12.875 },
                CycleRule { max_length: 1_200.0, max_width: 9_999.0, rate: 12.0 },
            ],
        }
    }

    fn dims(length: f64, width: f64) -> Dimensions {
        Dimensions { length_calc: length, width_calc: width, height_calc: 0.0 }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let r = CycleRateResolver::new(&config(), Utc::now());
        assert_eq!(r.resolve(&dims(500.0, 400.0)).rate, 15.0);
        assert_eq!(r.resolve(&dims(600.0, 400.0)).label, "rule_0");
        assert_eq!(r.resolve(&dims(700.0, 400.0)).rate, 12.875);
        let fallback = r.resolve(&dims(1_500.0, 400.0));
        assert_eq!(fallback.rate, 14.0);
        assert_eq!(fallback.label, DEFAULT_RATE_LABEL);
    }

    #[test]
    fn test_width_limit_applies() {
        let mut cfg = config();
        cfg.rules[0].max_width = 300.0;
        let r = CycleRateResolver::new(&cfg, Utc::now());
        assert_eq!(r.resolve(&dims(500.0, 400.0)).rate, 12.875);
    }

    #[test]
    fn test_rate_change_closes_period() {
        let t0 = Utc::now();
        let mut r = CycleRateResolver::new(&config(), t0);
        assert!(r.update(&dims(500.0, 400.0), t0));
        assert!(r.take_rate_changed());
        assert!(!r.take_rate_changed());

        r.record_element();
        r.accrue_work(t0 + Duration::seconds(4), true);
        r.record_element();

        let t1 = t0 + Duration::seconds(10);
        assert!(!r.update(&dims(550.0, 400.0), t1), "same rule, no change");
        assert!(r.update(&dims(1_500.0, 400.0), t1));

        let closed = r.history().last().unwrap();
        assert_eq!(closed.rate, 15.0);
        assert_eq!(closed.element_count, 2);
        assert!((closed.work_secs - 4.0).abs() < 1e-9);
        assert_eq!(closed.end, t1);
        assert_eq!(r.open_period().start, t1);
        assert_eq!(r.current_rate(), 14.0);
        assert_eq!(r.open_period().element_count, 0);
    }

    #[test]
    fn test_history_contiguous() {
        let t0 = Utc::now();
        let mut r = CycleRateResolver::new(&config(), t0);
        let lengths = [500.0, 700.0, 1_000.0, 700.0, 1_500.0];
        for (i, l) in lengths.iter().enumerate() {
            r.update(&dims(*l, 400.0), t0 + Duration::seconds(30 * i as i64 + 5));
        }
        let h = r.history();
        assert_eq!(h.len(), lengths.len());
        assert_eq!(h[0].start, t0);
        for w in h.windows(2) {
            assert_eq!(w[0].end, w[1].start);
            assert!(w[0].start <= w[0].end);
        }
        assert_eq!(h.last().unwrap().end, r.open_period().start);
    }

    #[test]
    fn test_negative_clock_delta_adds_no_work() {
        let t0 = Utc::now();
        let mut r = CycleRateResolver::new(&config(), t0);
        r.accrue_work(t0 - Duration::seconds(3), true);
        assert_eq!(r.open_period().work_secs, 0.0);
        r.accrue_work(t0 + Duration::seconds(2), true);
        assert!((r.open_period().work_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_elements_per_label_merges_periods() {
        let t0 = Utc::now();
        let mut r = CycleRateResolver::new(&config(), t0);
        r.update(&dims(500.0, 400.0), t0);
        r.record_element();
        r.update(&dims(700.0, 400.0), t0 + Duration::seconds(1));
        r.record_element();
        r.record_element();
        r.update(&dims(500.0, 400.0), t0 + Duration::seconds(2));
        r.record_element();
        let counts = r.elements_per_label();
        assert_eq!(counts["rule_0"], 2);
        assert_eq!(counts["rule_1"], 2);
        assert_eq!(counts.get(DEFAULT_RATE_LABEL), Some(&0));
    }
}
