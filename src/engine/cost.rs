//! Cost accountant: shift-scoped energy and air usage against baselines.

use std::collections::BTreeMap;
use tracing::warn;

use crate::acquisition::values::{as_f64, WarnThrottle};
use crate::config::CostConfig;
use crate::types::{AirHelpers, EnergyHelpers, MeterReadings, TelemetrySnapshot};

/// Cumulative energy counter per analyzer device, Wh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyReading {
    pub devices: BTreeMap<String, f64>,
}

impl EnergyReading {
    pub fn total_w(&self) -> f64 {
        self.devices.values().sum()
    }
}

/// Raw air totaliser per flow port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirReading {
    pub ports: BTreeMap<String, f64>,
}

impl AirReading {
    pub fn total_raw(&self) -> f64 {
        self.ports.values().sum()
    }
}

/// Every register of one analyzer device at a point in time.
pub type AnalyzerRegisters = BTreeMap<String, BTreeMap<String, f64>>;

/// One cost tick's worth of external counters. Either side may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostReading {
    pub energy: Option<EnergyReading>,
    pub air: Option<AirReading>,
    /// Full register dump per device, kept for the shift summary
    pub analyzers: AnalyzerRegisters,
}

impl CostReading {
    pub fn is_empty(&self) -> bool {
        self.energy.is_none() && self.air.is_none()
    }
}

/// Scale a cumulative energy value to Wh.
///
/// Power units (`W`, `kW`) are not energy counters and give `None`.
pub fn normalize_energy(value: f64, unit: &str) -> Option<f64> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "wh" => Some(value),
        "kwh" => Some(value * 1_000.0),
        "mwh" => Some(value * 1_000_000.0),
        _ => None,
    }
}

/// Latest energy counter of every configured device that reports one.
pub fn read_energy(
    meters: &MeterReadings,
    config: &CostConfig,
    throttle: &mut WarnThrottle,
) -> Option<EnergyReading> {
    let mut devices = BTreeMap::new();
    for device in &config.energy_devices {
        let key = format!("{device}.{}", config.energy_record_id);
        let latest = meters
            .records(device, &config.energy_record_id)
            .filter_map(|r| {
                let value = as_f64(&r.value);
                if value.is_none() && throttle.allow(&key) {
                    warn!(source = %key, value = %r.value, "Unparseable energy counter, skipping record");
                }
                let wh = normalize_energy(value?, &r.unit);
                if wh.is_none() && throttle.allow(&key) {
                    warn!(source = %key, unit = %r.unit, "Energy counter not in an energy unit, skipping record");
                }
                Some((r.timestamp, wh?))
            })
            .max_by_key(|(timestamp, _)| *timestamp);
        if let Some((_, wh)) = latest {
            devices.insert(device.clone(), wh);
        }
    }
    if devices.is_empty() {
        return None;
    }
    Some(EnergyReading { devices })
}

/// Latest value of every numeric register of each configured device.
/// Devices with no records are left out.
pub fn read_analyzers(meters: &MeterReadings, config: &CostConfig) -> AnalyzerRegisters {
    let mut analyzers = BTreeMap::new();
    for device in &config.energy_devices {
        let values: BTreeMap<String, f64> = meters
            .latest_registers(device)
            .into_iter()
            .filter_map(|(id, record)| Some((id, as_f64(&record.value)?)))
            .collect();
        if !values.is_empty() {
            analyzers.insert(device.clone(), values);
        }
    }
    analyzers
}

/// Totaliser of every configured flow port that is present and valid.
pub fn read_air(
    telemetry: &TelemetrySnapshot,
    config: &CostConfig,
    throttle: &mut WarnThrottle,
) -> Option<AirReading> {
    let mut ports = BTreeMap::new();
    for port in &config.flow_ports {
        let Some(group) = telemetry.group(port).filter(|g| g.valid) else {
            continue;
        };
        let Some(value) = group.fields.get(&config.totaliser_field) else {
            continue;
        };
        match as_f64(value) {
            Some(v) => {
                ports.insert(port.clone(), v);
            }
            None => {
                let key = format!("{port}.{}", config.totaliser_field);
                if throttle.allow(&key) {
                    warn!(source = %key, value = %value, "Unparseable flow totaliser, skipping port");
                }
            }
        }
    }
    if ports.is_empty() {
        return None;
    }
    Some(AirReading { ports })
}

/// Outcome of one `CostAccountant::observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostUpdate {
    /// No energy or air data this tick; figures untouched
    Skipped,
    /// At least one channel baseline captured; its delta starts next tick
    BaselineCaptured,
    Updated,
}

/// Baselines and shift deltas of one resource, per channel.
///
/// A channel missing from a reading keeps its last delta.
#[derive(Debug, Clone, Default, PartialEq)]
struct ChannelCounters {
    baselines: BTreeMap<String, f64>,
    deltas: BTreeMap<String, f64>,
}

impl ChannelCounters {
    /// Returns true when a channel saw its first value.
    fn observe<'a>(&mut self, values: impl Iterator<Item = (&'a String, f64)>) -> bool {
        let mut captured = false;
        for (channel, value) in values {
            match self.baselines.get(channel) {
                Some(base) => {
                    self.deltas.insert(channel.clone(), (value - base).max(0.0));
                }
                None => {
                    self.baselines.insert(channel.clone(), value);
                    self.deltas.insert(channel.clone(), 0.0);
                    captured = true;
                }
            }
        }
        captured
    }

    fn total(&self) -> f64 {
        self.deltas.values().sum()
    }

    fn baseline_total(&self) -> Option<f64> {
        (!self.baselines.is_empty()).then(|| self.baselines.values().sum())
    }

    fn restore(baselines: &BTreeMap<String, f64>, last: &BTreeMap<String, f64>) -> Self {
        let deltas = baselines
            .iter()
            .map(|(channel, base)| {
                let delta = last.get(channel).map_or(0.0, |v| (v - base).max(0.0));
                (channel.clone(), delta)
            })
            .collect();
        Self { baselines: baselines.clone(), deltas }
    }

    /// Snapshots that only kept the summed baseline: spread the persisted
    /// usage over the channels in proportion to their last value.
    fn restore_from_total(used: f64, last: &BTreeMap<String, f64>) -> Self {
        let sum: f64 = last.values().sum();
        let mut counters = Self::default();
        for (channel, value) in last {
            let delta = if sum > 0.0 { used * value / sum } else { 0.0 };
            counters.baselines.insert(channel.clone(), value - delta);
            counters.deltas.insert(channel.clone(), delta);
        }
        counters
    }
}

#[derive(Debug, Clone)]
pub struct CostAccountant {
    air_factor: f64,
    /// Wh per device
    energy: ChannelCounters,
    /// m³ per port
    air: ChannelCounters,
    /// Last value seen per device / port (raw totaliser for air)
    last_energy: EnergyReading,
    last_air: AirReading,
}

impl CostAccountant {
    pub fn new(air_factor: f64) -> Self {
        Self {
            air_factor,
            energy: ChannelCounters::default(),
            air: ChannelCounters::default(),
            last_energy: EnergyReading::default(),
            last_air: AirReading::default(),
        }
    }

    /// Fold one reading in. Each channel's first value after a reset becomes
    /// its baseline; later values report `max(current - baseline, 0)`.
    pub fn observe(&mut self, reading: &CostReading) -> CostUpdate {
        if reading.is_empty() {
            return CostUpdate::Skipped;
        }

        let mut captured = false;
        if let Some(energy) = &reading.energy {
            captured |= self.energy.observe(energy.devices.iter().map(|(k, v)| (k, *v)));
            self.last_energy.devices.extend(energy.devices.iter().map(|(k, v)| (k.clone(), *v)));
        }
        if let Some(air) = &reading.air {
            let factor = self.air_factor;
            captured |= self.air.observe(air.ports.iter().map(|(k, v)| (k, v * factor)));
            self.last_air.ports.extend(air.ports.iter().map(|(k, v)| (k.clone(), *v)));
        }

        if captured {
            CostUpdate::BaselineCaptured
        } else {
            CostUpdate::Updated
        }
    }

    pub fn energy_w(&self) -> f64 {
        self.energy.total()
    }

    pub fn air_m3(&self) -> f64 {
        self.air.total()
    }

    /// Sum of the device baselines, `None` before the first reading.
    pub fn energy_baseline(&self) -> Option<f64> {
        self.energy.baseline_total()
    }

    pub fn air_baseline(&self) -> Option<f64> {
        self.air.baseline_total()
    }

    /// `(energy, air)` per element; zero before the first element.
    pub fn per_piece(&self, elements: u64) -> (f64, f64) {
        if elements == 0 {
            return (0.0, 0.0);
        }
        let n = elements as f64;
        (self.energy_w() / n, self.air_m3() / n)
    }

    pub fn air_helpers(&self) -> AirHelpers {
        let total_raw = self.last_air.total_raw();
        AirHelpers {
            baseline_m3: self.air_baseline(),
            baselines_m3: self.air.baselines.clone(),
            factor: self.air_factor,
            total_raw,
            total_m3: total_raw * self.air_factor,
            ports: self.last_air.ports.clone(),
        }
    }

    pub fn energy_helpers(&self) -> EnergyHelpers {
        EnergyHelpers {
            baseline_w: self.energy_baseline(),
            baselines_w: self.energy.baselines.clone(),
            total_w: self.last_energy.total_w(),
            devices: self.last_energy.devices.clone(),
        }
    }

    /// Rebuild from persisted state; deltas are recomputed from the last
    /// value seen on each channel.
    pub fn restore(&mut self, energy_w: f64, air_m3: f64, energy: &EnergyHelpers, air: &AirHelpers) {
        self.last_energy = EnergyReading { devices: energy.devices.clone() };
        self.last_air = AirReading { ports: air.ports.clone() };
        let air_last: BTreeMap<String, f64> =
            air.ports.iter().map(|(k, v)| (k.clone(), v * self.air_factor)).collect();

        self.energy = match (energy.baselines_w.is_empty(), energy.baseline_w) {
            (false, _) => ChannelCounters::restore(&energy.baselines_w, &energy.devices),
            (true, Some(_)) => ChannelCounters::restore_from_total(energy_w, &energy.devices),
            (true, None) => ChannelCounters::default(),
        };
        self.air = match (air.baselines_m3.is_empty(), air.baseline_m3) {
            (false, _) => ChannelCounters::restore(&air.baselines_m3, &air_last),
            (true, Some(_)) => ChannelCounters::restore_from_total(air_m3, &air_last),
            (true, None) => ChannelCounters::default(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MeterRecord, SensorGroup};
    use chrono::Utc;
    use serde_json::json;

    fn energy_of(devices: &[(&str, f64)]) -> CostReading {
        let devices = devices.iter().map(|(d, kwh)| (d.to_string(), kwh * 1_000.0)).collect();
        CostReading { energy: Some(EnergyReading { devices }), ..Default::default() }
    }

    fn energy(total_kwh: f64) -> CostReading {
        energy_of(&[("device_1", total_kwh)])
    }

    fn record(id: &str, value: serde_json::Value, unit: &str) -> MeterRecord {
        MeterRecord { id: id.to_string(), value, unit: unit.to_string(), timestamp: Some(Utc::now()) }
    }

    #[test]
    fn test_first_read_captures_baseline_only() {
        let mut acc = CostAccountant::new(1.0);
        assert_eq!(acc.observe(&energy(10.0)), CostUpdate::BaselineCaptured);
        assert_eq!(acc.energy_w(), 0.0);
        assert_eq!(acc.observe(&energy(12.0)), CostUpdate::Updated);
        assert!((acc.energy_w() - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_regressing_counter_never_negative() {
        let mut acc = CostAccountant::new(1.0);
        acc.observe(&energy(10.0));
        acc.observe(&energy(9.0));
        assert_eq!(acc.energy_w(), 0.0);
    }

    #[test]
    fn test_empty_reading_keeps_figures() {
        let mut acc = CostAccountant::new(1.0);
        acc.observe(&energy(10.0));
        acc.observe(&energy(12.0));
        assert_eq!(acc.observe(&CostReading::default()), CostUpdate::Skipped);
        assert!((acc.energy_w() - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_device_keeps_its_usage() {
        let mut acc = CostAccountant::new(1.0);
        acc.observe(&energy_of(&[("device_1", 100.0), ("device_2", 500.0)]));
        acc.observe(&energy_of(&[("device_1", 102.0), ("device_2", 503.0)]));
        assert!((acc.energy_w() - 5_000.0).abs() < 1e-9);

        // device_2 drops out for a poll
        assert_eq!(acc.observe(&energy_of(&[("device_1", 104.0)])), CostUpdate::Updated);
        assert!((acc.energy_w() - 7_000.0).abs() < 1e-9);

        acc.observe(&energy_of(&[("device_1", 104.0), ("device_2", 505.0)]));
        assert!((acc.energy_w() - 9_000.0).abs() < 1e-9);
        assert_eq!(acc.energy_baseline(), Some(600_000.0));
    }

    #[test]
    fn test_late_device_gets_its_own_baseline() {
        let mut acc = CostAccountant::new(1.0);
        acc.observe(&energy_of(&[("device_1", 100.0)]));
        acc.observe(&energy_of(&[("device_1", 101.0)]));
        assert_eq!(
            acc.observe(&energy_of(&[("device_1", 102.0), ("device_2", 500.0)])),
            CostUpdate::BaselineCaptured
        );
        assert!((acc.energy_w() - 2_000.0).abs() < 1e-9);
        acc.observe(&energy_of(&[("device_1", 102.0), ("device_2", 501.0)]));
        assert!((acc.energy_w() - 3_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_air_baseline_captured_independently() {
        let mut acc = CostAccountant::new(1.0);
        acc.observe(&energy(10.0));
        let air = |m3: f64| CostReading {
            air: Some(AirReading { ports: BTreeMap::from([("master1/port3".to_string(), m3)]) }),
            ..Default::default()
        };
        assert_eq!(acc.observe(&air(40.0)), CostUpdate::BaselineCaptured);
        assert_eq!(acc.air_m3(), 0.0);
        acc.observe(&air(42.5));
        assert!((acc.air_m3() - 2.5).abs() < 1e-9);
        assert_eq!(acc.per_piece(5), (0.0, 0.5));
        assert_eq!(acc.per_piece(0), (0.0, 0.0));
    }

    #[test]
    fn test_restore_recomputes_per_port_usage() {
        let mut acc = CostAccountant::new(0.5);
        let air = |a: f64, b: f64| CostReading {
            air: Some(AirReading {
                ports: BTreeMap::from([("p1".to_string(), a), ("p2".to_string(), b)]),
            }),
            ..Default::default()
        };
        acc.observe(&air(100.0, 200.0));
        acc.observe(&air(104.0, 202.0));
        assert!((acc.air_m3() - 3.0).abs() < 1e-9);

        let mut back = CostAccountant::new(0.5);
        back.restore(acc.energy_w(), acc.air_m3(), &acc.energy_helpers(), &acc.air_helpers());
        assert!((back.air_m3() - 3.0).abs() < 1e-9);
        assert_eq!(back.air_baseline(), Some(150.0));
        back.observe(&air(106.0, 202.0));
        assert!((back.air_m3() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_restore_without_channel_baselines_keeps_usage() {
        let energy = EnergyHelpers {
            baseline_w: Some(597_000.0),
            baselines_w: BTreeMap::new(),
            total_w: 600_000.0,
            devices: BTreeMap::from([("device_1".to_string(), 100_000.0), ("device_2".to_string(), 500_000.0)]),
        };
        let mut acc = CostAccountant::new(1.0);
        acc.restore(3_000.0, 0.0, &energy, &AirHelpers::default());
        assert!((acc.energy_w() - 3_000.0).abs() < 1e-6);
        assert_eq!(acc.air_baseline(), None);
        acc.observe(&energy_of(&[("device_1", 101.0), ("device_2", 500.0)]));
        assert!((acc.energy_w() - 4_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_energy_rejects_power_units() {
        assert_eq!(normalize_energy(1.5, "kWh"), Some(1_500.0));
        assert_eq!(normalize_energy(250.0, "Wh"), Some(250.0));
        assert_eq!(normalize_energy(250.0, ""), Some(250.0));
        assert_eq!(normalize_energy(2.0, "MWh"), Some(2_000_000.0));
        assert_eq!(normalize_energy(3.2, "kW"), None);
        assert_eq!(normalize_energy(3_200.0, "W"), None);
    }

    #[test]
    fn test_read_energy_normalizes_and_skips_garbage() {
        let mut meters = MeterReadings::default();
        meters.devices.insert("device_1".into(), vec![record("ea_pos_total", json!(1.5), "kWh")]);
        meters.devices.insert("device_2".into(), vec![record("ea_pos_total", json!("250"), "Wh")]);
        meters.devices.insert("device_3".into(), vec![record("ea_pos_total", json!("err"), "kWh")]);
        let mut throttle = WarnThrottle::default();
        let reading = read_energy(&meters, &CostConfig::default(), &mut throttle).unwrap();
        assert_eq!(reading.devices.len(), 2);
        assert!((reading.total_w() - 1_750.0).abs() < 1e-9);
        assert!(read_energy(&MeterReadings::default(), &CostConfig::default(), &mut throttle).is_none());
    }

    #[test]
    fn test_read_energy_ignores_power_records() {
        let mut meters = MeterReadings::default();
        meters.devices.insert("device_1".into(), vec![record("EA_POS_TOTAL", json!(3.2), "kW")]);
        let mut throttle = WarnThrottle::default();
        assert!(read_energy(&meters, &CostConfig::default(), &mut throttle).is_none());

        meters.devices.insert(
            "device_1".into(),
            vec![record("EA_POS_TOTAL", json!(3.2), "kW"), record("EA_POS_TOTAL", json!(12.0), "kWh")],
        );
        let reading = read_energy(&meters, &CostConfig::default(), &mut throttle).unwrap();
        assert_eq!(reading.devices["device_1"], 12_000.0);
    }

    #[test]
    fn test_read_analyzers_collects_numeric_registers() {
        let mut meters = MeterReadings::default();
        meters.devices.insert(
            "device_1".into(),
            vec![
                record("ea_pos_total", json!(12.0), "kWh"),
                record("U_L1", json!("230,5"), "V"),
                record("status", json!("ok"), ""),
            ],
        );
        let analyzers = read_analyzers(&meters, &CostConfig::default());
        assert_eq!(analyzers.len(), 1);
        assert_eq!(analyzers["device_1"]["ea_pos_total"], 12.0);
        assert_eq!(analyzers["device_1"]["u_l1"], 230.5);
        assert!(!analyzers["device_1"].contains_key("status"));
    }

    #[test]
    fn test_read_air_keeps_raw_totaliser_per_port() {
        let now = Utc::now();
        let cfg = CostConfig::default();
        let mut t = TelemetrySnapshot::default();
        t.insert("master1/port3", SensorGroup::valid_at(now).with_field("totaliser", json!(100.0)));
        t.insert("master1/port4", SensorGroup::valid_at(now).with_field("totaliser", json!("20")));
        let mut invalid = SensorGroup::valid_at(now).with_field("totaliser", json!(999.0));
        invalid.valid = false;
        t.insert("master2/port0", invalid);
        let reading = read_air(&t, &cfg, &mut WarnThrottle::default()).unwrap();
        assert_eq!(reading.ports.len(), 2);
        assert!((reading.total_raw() - 120.0).abs() < 1e-9);
    }
}
