//! Synthetic production line for demos and soak runs.
//!
//! Produces elements at the rate the default rule table assigns to the
//! current product, switches product every `PRODUCT_RUN_SECS` with a
//! changeover gap, drops in random idle stops, and advances energy and air
//! counters while running.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Mutex;

use super::feed::{FeedError, MeterFeed, TelemetryFeed};
use crate::config::{CostConfig, SignalConfig};
use crate::types::{MeterReadings, MeterRecord, SensorGroup, TelemetrySnapshot};

/// Calibrated product lengths (mm) and their nominal rates.
const PRODUCTS: [(f64, f64); 4] = [(500.0, 15.0), (700.0, 12.875), (1_000.0, 12.0), (1_500.0, 7.06)];

const PRODUCT_RUN_SECS: i64 = 1_800;
const CHANGEOVER_SECS: i64 = 150;
const ELEMENT_PULSE_MS: i64 = 300;
const SPEED_PULSE_MS: i64 = 60;

struct SimState {
    rng: StdRng,
    last: DateTime<Utc>,
    next_element: DateTime<Utc>,
    pulse_until: DateTime<Utc>,
    stop_until: Option<DateTime<Utc>>,
    product: usize,
    product_since: DateTime<Utc>,
    energy_kwh: Vec<f64>,
    air_m3: Vec<f64>,
}

impl SimState {
    fn running(&self, now: DateTime<Utc>) -> bool {
        self.stop_until.map_or(true, |t| now >= t)
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        let dt = (now - self.last).num_milliseconds().max(0) as f64 / 1000.0;
        self.last = now;

        if now - self.product_since >= Duration::seconds(PRODUCT_RUN_SECS) {
            self.product = (self.product + 1) % PRODUCTS.len();
            self.product_since = now;
            self.stop_until = Some(now + Duration::seconds(CHANGEOVER_SECS));
        } else if self.running(now) && self.rng.gen_bool((dt / 600.0).clamp(0.0, 1.0)) {
            let secs = self.rng.gen_range(20..120);
            self.stop_until = Some(now + Duration::seconds(secs));
        }

        if !self.running(now) {
            self.next_element = now;
            return;
        }

        if now >= self.next_element {
            let (_, rate) = PRODUCTS[self.product];
            let jitter = self.rng.gen_range(0.9..1.1);
            let period_ms = (60_000.0 / rate * jitter) as i64;
            self.pulse_until = now + Duration::milliseconds(ELEMENT_PULSE_MS);
            self.next_element = now + Duration::milliseconds(period_ms);
        }

        for kwh in &mut self.energy_kwh {
            *kwh += dt * self.rng.gen_range(0.003..0.005);
        }
        for m3 in &mut self.air_m3 {
            *m3 += dt * self.rng.gen_range(0.001..0.003);
        }
    }
}

/// Simulated line implementing both feeds.
pub struct SimulatedLine {
    signals: SignalConfig,
    cost: CostConfig,
    state: Mutex<SimState>,
}

impl SimulatedLine {
    pub fn new(signals: SignalConfig, cost: CostConfig, seed: u64, now: DateTime<Utc>) -> Self {
        let state = SimState {
            rng: StdRng::seed_from_u64(seed),
            last: now,
            next_element: now,
            pulse_until: now,
            stop_until: None,
            product: 0,
            product_since: now,
            energy_kwh: vec![1_000.0; cost.energy_devices.len()],
            air_m3: vec![500.0; cost.flow_ports.len()],
        };
        Self { signals, cost, state: Mutex::new(state) }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> Result<T, FeedError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| FeedError::Unavailable(format!("simulator state poisoned: {e}")))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl TelemetryFeed for SimulatedLine {
    async fn latest(&self) -> Result<Option<TelemetrySnapshot>, FeedError> {
        let now = Utc::now();
        self.with_state(|st| {
            st.advance(now);
            let running = st.running(now);
            let (length_mm, _) = PRODUCTS[st.product];
            let speed_high = running && (now.timestamp_millis() / SPEED_PULSE_MS) % 2 == 0;

            let s = &self.signals;
            let mut snap = TelemetrySnapshot::default();
            let mut put = |group: &str, field: &str, value: serde_json::Value| {
                let entry = snap
                    .groups
                    .entry(group.to_string())
                    .or_insert_with(|| SensorGroup::valid_at(now));
                entry.fields.insert(field.to_string(), value);
            };
            put(&s.machine_on.group, &s.machine_on.field, json!(true));
            put(&s.element_present.group, &s.element_present.field, json!(now < st.pulse_until));
            put(&s.speed_pulse.group, &s.speed_pulse.field, json!(speed_high));
            put(&s.length_raw.group, &s.length_raw.field, json!((length_mm + 20.0) * 10.0));
            put(&s.width_raw.group, &s.width_raw.field, json!(3_000.0));
            put(&s.height_raw.group, &s.height_raw.field, json!(1_050.0));

            for (port, m3) in self.cost.flow_ports.iter().zip(&st.air_m3) {
                put(port, &self.cost.totaliser_field, json!(m3));
            }
            Some(snap)
        })
    }

    fn source_name(&self) -> &str {
        "simulated-line"
    }
}

#[async_trait]
impl MeterFeed for SimulatedLine {
    async fn latest(&self) -> Result<Option<MeterReadings>, FeedError> {
        let now = Utc::now();
        self.with_state(|st| {
            st.advance(now);
            let mut readings = MeterReadings::default();
            for (device, kwh) in self.cost.energy_devices.iter().zip(&st.energy_kwh) {
                readings.devices.insert(
                    device.clone(),
                    vec![MeterRecord {
                        id: self.cost.energy_record_id.clone(),
                        value: json!(kwh),
                        unit: "kWh".to_string(),
                        timestamp: Some(now),
                    }],
                );
            }
            Some(readings)
        })
    }

    fn source_name(&self) -> &str {
        "simulated-line"
    }
}
