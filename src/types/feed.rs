//! Readings handed over by the external feeds.
//!
//! This is the only place loosely typed values (`serde_json::Value`) appear;
//! the sampler and the cost accountant convert them into typed fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One logical sensor group of the telemetry feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorGroup {
    pub valid: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl SensorGroup {
    pub fn valid_at(timestamp: DateTime<Utc>) -> Self {
        Self { valid: true, timestamp: Some(timestamp), fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, name: &str, value: serde_json::Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Latest state of every sensor group, keyed by group name (`master1/port1`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    pub groups: BTreeMap<String, SensorGroup>,
}

impl TelemetrySnapshot {
    pub fn group(&self, name: &str) -> Option<&SensorGroup> {
        self.groups.get(name)
    }

    pub fn insert(&mut self, name: &str, group: SensorGroup) {
        self.groups.insert(name.to_string(), group);
    }
}

/// One record of a polled device (`{id, value, unit, timestamp}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterRecord {
    pub id: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Per-device record lists from the polled feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterReadings {
    pub devices: BTreeMap<String, Vec<MeterRecord>>,
}

impl MeterReadings {
    /// Records with `id` for `device`. Ids match case-insensitively.
    pub fn records<'a: 'b, 'b>(
        &'a self,
        device: &str,
        id: &'b str,
    ) -> impl Iterator<Item = &'a MeterRecord> + 'b {
        self.devices
            .get(device)
            .into_iter()
            .flatten()
            .filter(move |r| r.id.eq_ignore_ascii_case(id))
    }

    /// Latest record with `id` for `device`, by timestamp.
    ///
    /// Records without a timestamp lose to any timestamped one.
    pub fn latest(&self, device: &str, id: &str) -> Option<&MeterRecord> {
        self.records(device, id).max_by_key(|r| r.timestamp)
    }

    /// Latest record of every register of `device`, keyed by lowercased id.
    pub fn latest_registers(&self, device: &str) -> BTreeMap<String, &MeterRecord> {
        let mut latest: BTreeMap<String, &MeterRecord> = BTreeMap::new();
        for record in self.devices.get(device).into_iter().flatten() {
            let id = record.id.to_ascii_lowercase();
            match latest.get(&id) {
                Some(seen) if seen.timestamp > record.timestamp => {}
                _ => {
                    latest.insert(id, record);
                }
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_record_by_timestamp() {
        let t0 = Utc::now();
        let mut readings = MeterReadings::default();
        readings.devices.insert(
            "device_1".to_string(),
            vec![
                MeterRecord {
                    id: "ea_pos_total".to_string(),
                    value: json!(12.0),
                    unit: "kWh".to_string(),
                    timestamp: Some(t0 + chrono::Duration::seconds(5)),
                },
                MeterRecord {
                    id: "ea_pos_total".to_string(),
                    value: json!(10.0),
                    unit: "kWh".to_string(),
                    timestamp: Some(t0),
                },
                MeterRecord {
                    id: "u_l1".to_string(),
                    value: json!(230.1),
                    unit: "V".to_string(),
                    timestamp: Some(t0 + chrono::Duration::seconds(9)),
                },
            ],
        );
        let rec = readings.latest("device_1", "ea_pos_total").unwrap();
        assert_eq!(rec.value, json!(12.0));
        assert!(readings.latest("device_2", "ea_pos_total").is_none());
    }

    fn record(id: &str, value: serde_json::Value, unit: &str, at: DateTime<Utc>) -> MeterRecord {
        MeterRecord { id: id.to_string(), value, unit: unit.to_string(), timestamp: Some(at) }
    }

    #[test]
    fn test_record_ids_match_ignoring_case() {
        let t0 = Utc::now();
        let mut readings = MeterReadings::default();
        readings.devices.insert(
            "device_1".to_string(),
            vec![record("EA_POS_TOTAL", json!(42.0), "kWh", t0)],
        );
        let rec = readings.latest("device_1", "ea_pos_total").unwrap();
        assert_eq!(rec.value, json!(42.0));
        assert_eq!(readings.records("device_1", "Ea_Pos_Total").count(), 1);
    }

    #[test]
    fn test_latest_registers_fold_id_case() {
        let t0 = Utc::now();
        let later = t0 + chrono::Duration::seconds(3);
        let mut readings = MeterReadings::default();
        readings.devices.insert(
            "device_1".to_string(),
            vec![
                record("U_L1", json!(231.0), "V", later),
                record("u_l1", json!(229.5), "V", t0),
                record("ea_pos_total", json!("17.5"), "kWh", t0),
            ],
        );
        let registers = readings.latest_registers("device_1");
        assert_eq!(registers.len(), 2);
        assert_eq!(registers["u_l1"].value, json!(231.0));
        assert!(readings.latest_registers("device_9").is_empty());
    }
}
