//! Per-channel start values of the external counters for the running shift.
//!
//! Energy channels are analyzer devices (W-scaled), air channels are flow
//! ports (m³, totaliser x air factor). Starts live in process memory; after a
//! restart they are recovered from the last written shift summary.

use std::collections::BTreeMap;

use crate::config::CostConfig;
use crate::engine::CostReading;
use crate::types::{CounterDelta, OeeSnapshot, ResourceUsage, ShiftSummary};

/// Current counter value per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterReadings {
    pub energy: BTreeMap<String, f64>,
    pub air: BTreeMap<String, f64>,
}

impl CounterReadings {
    pub fn from_cost(reading: &CostReading, air_factor: f64) -> Self {
        Self {
            energy: reading.energy.as_ref().map(|e| e.devices.clone()).unwrap_or_default(),
            air: reading
                .air
                .as_ref()
                .map(|a| a.ports.iter().map(|(k, v)| (k.clone(), v * air_factor)).collect())
                .unwrap_or_default(),
        }
    }

    /// Last values the cost accountant saw, as kept in the snapshot helpers.
    pub fn from_snapshot(snapshot: &OeeSnapshot) -> Self {
        let factor = snapshot.helpers_air.factor;
        Self {
            energy: snapshot.helpers_energy.devices.clone(),
            air: snapshot.helpers_air.ports.iter().map(|(k, v)| (k.clone(), v * factor)).collect(),
        }
    }

    /// Fill channels this reading lacks from `fallback`.
    pub fn or_else(mut self, fallback: &CounterReadings) -> Self {
        for (k, v) in &fallback.energy {
            self.energy.entry(k.clone()).or_insert(*v);
        }
        for (k, v) in &fallback.air {
            self.air.entry(k.clone()).or_insert(*v);
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct CounterBaselines {
    energy_channels: Vec<String>,
    air_channels: Vec<String>,
    energy_start: BTreeMap<String, f64>,
    air_start: BTreeMap<String, f64>,
}

impl CounterBaselines {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            energy_channels: config.energy_devices.clone(),
            air_channels: config.flow_ports.clone(),
            energy_start: BTreeMap::new(),
            air_start: BTreeMap::new(),
        }
    }

    pub fn energy_start(&self, channel: &str) -> Option<f64> {
        self.energy_start.get(channel).copied()
    }

    pub fn air_start(&self, channel: &str) -> Option<f64> {
        self.air_start.get(channel).copied()
    }

    /// Shift usage per channel as `(energy, air)`.
    ///
    /// Channels without a start take the previous summary's last value, or
    /// the current value when there is no previous summary. Channels with no
    /// reading at all are left out.
    pub fn usage(
        &mut self,
        current: &CounterReadings,
        previous: Option<&ShiftSummary>,
        elements: u64,
    ) -> (ResourceUsage, ResourceUsage) {
        let energy = channel_usage(
            &self.energy_channels,
            &mut self.energy_start,
            &current.energy,
            previous.map(|s| &s.energy),
        );
        let air = channel_usage(
            &self.air_channels,
            &mut self.air_start,
            &current.air,
            previous.map(|s| &s.air),
        );
        (
            ResourceUsage::from_channels(energy, elements),
            ResourceUsage::from_channels(air, elements),
        )
    }

    /// Start a new shift from `current`; channels without a live value take
    /// the `last` recorded in `previous`.
    pub fn rebase(&mut self, current: &CounterReadings, previous: Option<&ShiftSummary>) {
        self.energy_start =
            rebased(&self.energy_channels, &current.energy, previous.map(|s| &s.energy));
        self.air_start = rebased(&self.air_channels, &current.air, previous.map(|s| &s.air));
    }
}

fn previous_last(previous: Option<&ResourceUsage>, channel: &str) -> Option<f64> {
    previous?.channels.get(channel).map(|c| c.last)
}

fn channel_usage(
    channels: &[String],
    starts: &mut BTreeMap<String, f64>,
    current: &BTreeMap<String, f64>,
    previous: Option<&ResourceUsage>,
) -> BTreeMap<String, CounterDelta> {
    let mut out = BTreeMap::new();
    for channel in channels {
        let now = current.get(channel).copied();
        let start = match starts.get(channel) {
            Some(s) => *s,
            None => match previous_last(previous, channel).or(now) {
                Some(s) => {
                    starts.insert(channel.clone(), s);
                    s
                }
                None => continue,
            },
        };
        out.insert(channel.clone(), CounterDelta::new(start, now.unwrap_or(start)));
    }
    out
}

fn rebased(
    channels: &[String],
    current: &BTreeMap<String, f64>,
    previous: Option<&ResourceUsage>,
) -> BTreeMap<String, f64> {
    channels
        .iter()
        .filter_map(|c| {
            let value = current.get(c).copied().or_else(|| previous_last(previous, c))?;
            Some((c.clone(), value))
        })
        .collect()
}
