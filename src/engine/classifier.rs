//! Work / idle / changeover classifier.
//!
//! State machine over element-present edges and the idle timeout:
//!
//! ```text
//! NOT_STARTED --first rising edge--> WORKING --no element for timeout--> PAUSED
//!                                       ^                                  |
//!                                       +-------- next rising edge --------+
//! ```
//!
//! A pause starts at `last_element_time + idle_timeout`, never at the tick that
//! noticed it. When it ends, it is committed as changeover if the rate at the
//! resume differs from the rate recorded when it opened and it was short
//! enough, otherwise as idle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::cycle_rate::seconds_between;
use crate::config::ClassifierConfig;
use crate::types::{BackfillRequest, PauseInterval};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineState {
    NotStarted,
    Working,
    Paused,
}

impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineState::NotStarted => write!(f, "NOT_STARTED"),
            LineState::Working => write!(f, "WORKING"),
            LineState::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Time buckets after a classifier tick (seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeBuckets {
    pub measured: f64,
    pub work: f64,
    pub idle: f64,
    pub changeover: f64,
    /// Changeover if the open pause turns out to be one
    pub changeover_temp: f64,
}

#[derive(Debug, Clone)]
pub struct WorkClassifier {
    idle_timeout: Duration,
    max_changeover_secs: f64,
    rate_epsilon: f64,

    start_measurement: DateTime<Utc>,
    element_last_time: DateTime<Utc>,
    first_element_seen: bool,
    prev_element: bool,

    committed_idle: f64,
    pause: Option<PauseInterval>,
    count_at_last_resume: u64,

    buckets: TimeBuckets,
}

impl WorkClassifier {
    pub fn new(config: &ClassifierConfig, rate_epsilon: f64, now: DateTime<Utc>) -> Self {
        Self {
            idle_timeout: Duration::milliseconds((config.idle_timeout_secs * 1000.0) as i64),
            max_changeover_secs: config.max_changeover_secs,
            rate_epsilon,
            start_measurement: now,
            element_last_time: now,
            first_element_seen: false,
            prev_element: false,
            committed_idle: 0.0,
            pause: None,
            count_at_last_resume: 0,
            buckets: TimeBuckets::default(),
        }
    }

    /// Edge detection on the element-present signal.
    ///
    /// Returns true on a 0 -> 1 transition relative to the previous tick. The
    /// first element only marks the measurement live; later ones move the
    /// idle-timeout clock.
    pub fn observe_element(&mut self, present: bool, now: DateTime<Utc>) -> bool {
        let rising = present && !self.prev_element;
        self.prev_element = present;
        if rising {
            if self.first_element_seen {
                self.element_last_time = now;
            } else {
                self.first_element_seen = true;
            }
        }
        rising
    }

    /// Advance the time buckets to `now`.
    ///
    /// `rising` and `element_count` come from this tick's `observe_element`
    /// and element counter; `rate` is the rate resolved this tick. Returns a
    /// backfill request when a pause was just committed as changeover.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        rising: bool,
        element_count: u64,
        rate: f64,
    ) -> Option<BackfillRequest> {
        let measured = seconds_between(self.start_measurement, now);

        if !self.first_element_seen {
            self.buckets = TimeBuckets { measured, idle: measured, ..TimeBuckets::default() };
            return None;
        }

        if !self.prev_element && self.pause.is_none() && now - self.element_last_time >= self.idle_timeout {
            self.pause = Some(PauseInterval {
                start: self.element_last_time + self.idle_timeout,
                idle_at_start: self.committed_idle,
                changeover_at_start: self.buckets.changeover,
                element_count_at_start: element_count,
                rate_at_start: rate,
            });
        }

        let mut backfill = None;
        if rising && element_count != self.count_at_last_resume {
            if let Some(pause) = self.pause.take() {
                let duration = seconds_between(pause.start, now);
                let rate_moved = (rate - pause.rate_at_start).abs() > self.rate_epsilon;

                if rate_moved && duration <= self.max_changeover_secs {
                    self.buckets.changeover = pause.changeover_at_start + duration;
                    self.committed_idle = pause.idle_at_start;
                    backfill = Some(BackfillRequest { start: pause.start, end: now.max(pause.start) });
                } else {
                    self.committed_idle += duration;
                    self.buckets.changeover_temp = 0.0;
                }
                self.count_at_last_resume = element_count;
            }
            self.buckets.changeover_temp = self.buckets.changeover;
        }

        if let Some(pause) = &self.pause {
            let paused = seconds_between(pause.start, now);
            self.buckets.idle = pause.idle_at_start + paused;
            self.buckets.changeover_temp = pause.changeover_at_start + paused;
        } else {
            self.buckets.idle = self.committed_idle;
        }

        self.buckets.measured = measured;
        self.buckets.work = (measured - self.buckets.idle - self.buckets.changeover).max(0.0);
        backfill
    }

    pub fn state(&self) -> LineState {
        if !self.first_element_seen {
            LineState::NotStarted
        } else if self.pause.is_some() {
            LineState::Paused
        } else {
            LineState::Working
        }
    }

    /// True while elements flow: started and no open pause.
    pub fn is_working(&self) -> bool {
        self.state() == LineState::Working
    }

    pub fn buckets(&self) -> TimeBuckets {
        self.buckets
    }

    pub fn pause(&self) -> Option<&PauseInterval> {
        self.pause.as_ref()
    }

    pub fn start_measurement(&self) -> DateTime<Utc> {
        self.start_measurement
    }

    pub fn element_last_time(&self) -> DateTime<Utc> {
        self.element_last_time
    }

    pub fn first_element_seen(&self) -> bool {
        self.first_element_seen
    }

    pub fn committed_idle(&self) -> f64 {
        self.committed_idle
    }

    /// Element signal level seen on the last tick.
    pub fn prev_element(&self) -> bool {
        self.prev_element
    }

    pub fn count_at_last_resume(&self) -> u64 {
        self.count_at_last_resume
    }

    /// Rebuild from persisted state. Edge detection resumes from the
    /// persisted signal level, so an element held across a restart is not
    /// counted twice.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        &mut self,
        start_measurement: DateTime<Utc>,
        element_last_time: DateTime<Utc>,
        first_element_seen: bool,
        prev_element: bool,
        committed_idle: f64,
        pause: Option<PauseInterval>,
        count_at_last_resume: u64,
        buckets: TimeBuckets,
    ) {
        self.start_measurement = start_measurement;
        self.element_last_time = element_last_time;
        self.first_element_seen = first_element_seen;
        self.prev_element = prev_element;
        self.committed_idle = committed_idle;
        self.pause = pause;
        self.count_at_last_resume = count_at_last_resume;
        self.buckets = buckets;
    }
}
