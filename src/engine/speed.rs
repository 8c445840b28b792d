//! Rotary speed from speed-sensor pulses.

use chrono::{DateTime, Utc};

use crate::config::defaults::SPEED_WINDOW_MS;

/// Counts rising edges of the speed pulse and converts them to rev/min
/// once per window.
#[derive(Debug, Clone)]
pub struct RotarySpeedMeter {
    impulses_per_revolution: f64,
    impulses: u32,
    prev_pulse: bool,
    window_start: DateTime<Utc>,
    rpm: f64,
}

impl RotarySpeedMeter {
    pub fn new(impulses_per_revolution: f64, now: DateTime<Utc>) -> Self {
        Self {
            impulses_per_revolution,
            impulses: 0,
            prev_pulse: false,
            window_start: now,
            rpm: 0.0,
        }
    }

    pub fn update(&mut self, pulse: bool, now: DateTime<Utc>) {
        if pulse && !self.prev_pulse {
            self.impulses += 1;
        }
        self.prev_pulse = pulse;

        let elapsed_ms = (now - self.window_start).num_milliseconds();
        if elapsed_ms >= SPEED_WINDOW_MS {
            let revolutions = f64::from(self.impulses) / self.impulses_per_revolution;
            self.rpm = revolutions * 60_000.0 / elapsed_ms as f64;
            self.impulses = 0;
            self.window_start = now;
        } else if elapsed_ms < 0 {
            // clock stepped backwards; restart the window
            self.impulses = 0;
            self.window_start = now;
        }
    }

    pub fn rpm(&self) -> f64 {
        self.rpm
    }

    /// Pulse level seen on the last tick.
    pub fn prev_pulse(&self) -> bool {
        self.prev_pulse
    }

    pub fn restore(&mut self, rpm: f64, prev_pulse: bool) {
        self.rpm = rpm;
        self.prev_pulse = prev_pulse;
    }
}
