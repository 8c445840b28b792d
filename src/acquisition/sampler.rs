//! Signal sampler: telemetry groups -> typed `SignalFrame`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::values::{as_bool, as_f64, WarnThrottle};
use crate::config::{SignalConfig, SignalSource};
use crate::types::{SignalFrame, TelemetrySnapshot};

/// Converts one telemetry reading into a `SignalFrame` per tick.
///
/// Never fails: missing, invalid or malformed fields become `false` / `0.0`
/// and are reported through a per-source warning throttle.
pub struct SignalSampler {
    sources: SignalConfig,
    throttle: WarnThrottle,
}

impl SignalSampler {
    pub fn new(sources: SignalConfig) -> Self {
        Self { sources, throttle: WarnThrottle::default() }
    }

    pub fn with_throttle(sources: SignalConfig, throttle: WarnThrottle) -> Self {
        Self { sources, throttle }
    }

    pub fn sample(&mut self, telemetry: &TelemetrySnapshot, now: DateTime<Utc>) -> SignalFrame {
        let s = &self.sources;
        let th = &mut self.throttle;

        SignalFrame {
            timestamp: now,
            machine_on: read_bool(th, telemetry, &s.machine_on),
            element_present: read_bool(th, telemetry, &s.element_present),
            speed_pulse: read_bool(th, telemetry, &s.speed_pulse),
            length_raw: read_f64(th, telemetry, &s.length_raw),
            width_raw: read_f64(th, telemetry, &s.width_raw),
            height_raw: read_f64(th, telemetry, &s.height_raw),
        }
    }
}

fn read_bool(th: &mut WarnThrottle, telemetry: &TelemetrySnapshot, source: &SignalSource) -> bool {
    lookup(th, telemetry, source)
        .and_then(|v| convert(th, source, v, as_bool))
        .unwrap_or(false)
}

fn read_f64(th: &mut WarnThrottle, telemetry: &TelemetrySnapshot, source: &SignalSource) -> f64 {
    lookup(th, telemetry, source)
        .and_then(|v| convert(th, source, v, as_f64))
        .unwrap_or(0.0)
}

fn lookup<'a>(
    th: &mut WarnThrottle,
    telemetry: &'a TelemetrySnapshot,
    source: &SignalSource,
) -> Option<&'a Value> {
    let Some(group) = telemetry.group(&source.group) else {
        warn_once(th, &source.group, "sensor group missing from telemetry");
        return None;
    };
    if !group.valid {
        warn_once(th, &source.group, "sensor group flagged invalid");
        return None;
    }
    let value = group.fields.get(&source.field);
    if value.is_none() {
        warn_once(th, &source.key(), "field missing from sensor group");
    }
    value
}

fn convert<T>(
    th: &mut WarnThrottle,
    source: &SignalSource,
    value: &Value,
    f: fn(&Value) -> Option<T>,
) -> Option<T> {
    let converted = f(value);
    if converted.is_none() && !value.is_null() {
        let key = source.key();
        if th.allow(&key) {
            warn!(source = %key, value = %value, "Unparseable signal value, using default");
        }
    }
    converted
}

fn warn_once(th: &mut WarnThrottle, key: &str, reason: &str) {
    if th.allow(key) {
        warn!(source = %key, "{reason}, using default");
    }
}
