//! Fail-soft conversion of loosely typed feed values.
//!
//! Feeds deliver whatever the field device sent: numbers, numeric strings,
//! booleans, nulls. Conversions return `None` instead of failing so one
//! malformed field never blocks the rest of a tick.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::defaults::MALFORMED_WARN_INTERVAL_SECS;

/// Numeric view of a feed value.
///
/// Accepts numbers, numeric strings (`"12.5"`, `" 7 "`, `"3,25"`) and
/// booleans (1.0 / 0.0). Non-finite results are rejected.
pub fn as_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            s.parse::<f64>()
                .ok()
                .or_else(|| s.replace(',', ".").parse::<f64>().ok())?
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    v.is_finite().then_some(v)
}

/// Boolean view of a feed value.
///
/// Numbers are true when non-zero; strings accept `true/false`, `on/off`,
/// `1/0` in any case.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Rate limiter for malformed-input warnings, keyed by source.
#[derive(Debug)]
pub struct WarnThrottle {
    interval: Duration,
    last: HashMap<String, Instant>,
}

impl Default for WarnThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(MALFORMED_WARN_INTERVAL_SECS))
    }
}

impl WarnThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: HashMap::new() }
    }

    /// True when a warning for `key` may be emitted now.
    pub fn allow(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.last.get(key) {
            Some(t) if now.duration_since(*t) < self.interval => false,
            _ => {
                self.last.insert(key.to_string(), now);
                true
            }
        }
    }
}
