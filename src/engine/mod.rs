//! Production-state engine
//!
//! `OeeEngine` owns every piece of mutable line state: the classifier, the
//! cycle-rate resolver, the rotary speed meter, the cost accountant and the
//! live estimator. Tasks share it behind one lock (`SharedEngine`)
//! and only ever exchange owned copies (`OeeSnapshot`) with the outside.
//!
//! ## Tick order
//!
//! 1. Rotary speed pulse counting
//! 2. Element edge detection and counting
//! 3. Dimension calibration and rate resolution (may close a cycle period)
//! 4. Element attribution to the (possibly new) open cycle period
//! 5. Time classification (may commit a pause, may request a backfill)
//! 6. Work-second accrual into the open cycle period

pub mod classifier;
pub mod cost;
pub mod cycle_rate;
pub mod metrics;
pub mod speed;

pub use classifier::{LineState, TimeBuckets, WorkClassifier};
pub use cost::{CostAccountant, CostReading, CostUpdate};
pub use cycle_rate::CycleRateResolver;
pub use metrics::{LiveEstimator, OeeFigures};
pub use speed::RotarySpeedMeter;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{CalibrationConfig, ClassifierConfig, CycleConfig, LineConfig};
use crate::types::{
    BackfillRequest, CyclePeriod, Dimensions, InternalSection, OeeSection, OeeSnapshot,
    OpenCyclePeriod, ProductSection, SignalFrame,
};

/// The engine as shared by the pipeline tasks. Never held across I/O.
pub type SharedEngine = Arc<Mutex<OeeEngine>>;

/// Config pieces the engine needs after construction (resets).
#[derive(Debug, Clone)]
struct EngineSettings {
    cycle: CycleConfig,
    classifier: ClassifierConfig,
    calibration: CalibrationConfig,
    impulses_per_revolution: f64,
    air_factor: f64,
}

impl From<&LineConfig> for EngineSettings {
    fn from(c: &LineConfig) -> Self {
        Self {
            cycle: c.cycle.clone(),
            classifier: c.classifier.clone(),
            calibration: c.calibration.clone(),
            impulses_per_revolution: c.signals.impulses_per_revolution,
            air_factor: c.cost.air_factor,
        }
    }
}

/// What one tick changed, for the caller to act on outside the lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub rising_edge: bool,
    pub rate_changed: bool,
    pub backfill: Option<BackfillRequest>,
}

#[derive(Debug, Clone)]
pub struct OeeEngine {
    settings: EngineSettings,
    classifier: WorkClassifier,
    resolver: CycleRateResolver,
    speed: RotarySpeedMeter,
    cost: CostAccountant,
    live: LiveEstimator,
    element_count: u64,
    machine_on: bool,
    dimensions: Dimensions,
    last_tick: DateTime<Utc>,
}

impl OeeEngine {
    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn new(config: &LineConfig, now: DateTime<Utc>) -> Self {
        let settings = EngineSettings::from(config);
        let resolver = CycleRateResolver::new(&settings.cycle, now);
        let classifier =
            WorkClassifier::new(&settings.classifier, settings.cycle.rate_epsilon, now);
        Self {
            speed: RotarySpeedMeter::new(settings.impulses_per_revolution, now),
            cost: CostAccountant::new(settings.air_factor),
            live: LiveEstimator::new(),
            classifier,
            resolver,
            element_count: 0,
            machine_on: false,
            dimensions: Dimensions::default(),
            last_tick: now,
            settings,
        }
    }

    /// Advance the engine to `frame.timestamp`.
    pub fn tick(&mut self, frame: &SignalFrame) -> TickOutcome {
        let now = frame.timestamp;
        self.machine_on = frame.machine_on;

        self.speed.update(frame.speed_pulse, now);

        let rising_edge = self.classifier.observe_element(frame.element_present, now);
        if rising_edge {
            self.element_count += 1;
        }

        self.dimensions = Dimensions::from_frame(frame, &self.settings.calibration);
        let rate_changed = self.resolver.update(&self.dimensions, now);
        if rate_changed {
            debug!(
                rate = self.resolver.current_rate(),
                rule = %self.resolver.current_label(),
                length = self.dimensions.length_calc,
                "Cycle rate changed"
            );
        }
        // the element belongs to the product measured with it
        if rising_edge {
            self.resolver.record_element();
        }

        let backfill =
            self.classifier
                .update(now, rising_edge, self.element_count, self.resolver.current_rate());

        self.resolver.accrue_work(now, self.classifier.is_working());
        self.last_tick = now;

        TickOutcome { rising_edge, rate_changed, backfill }
    }

    /// Cumulative figures as of `now` (pending work since the last tick included).
    pub fn figures(&self, now: DateTime<Utc>) -> OeeFigures {
        let buckets = self.classifier.buckets();
        let pending = self.resolver.pending_work_secs(now, self.classifier.is_working());
        OeeFigures::from_parts(
            metrics::availability(&buckets),
            metrics::performance(self.resolver.history(), self.resolver.open_period(), pending),
            metrics::QUALITY,
        )
    }

    pub fn observe_costs(&mut self, reading: &CostReading) -> CostUpdate {
        self.cost.observe(reading)
    }

    /// Feed the live estimator one read of the persisted snapshot.
    pub fn observe_live(&mut self, persisted: &OeeSnapshot, interval_secs: f64) {
        self.live.observe_availability(persisted);
        let rate_changed = self.resolver.take_rate_changed();
        self.live.observe_performance(
            persisted,
            self.resolver.current_rate(),
            interval_secs,
            rate_changed,
        );
    }

    /// Start a new shift: zero counters, clear the pause, drop cost baselines.
    ///
    /// The current product rate carries over into the new open period.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let rate = self.resolver.current_rate();
        let label = self.resolver.current_label().to_string();

        let mut resolver = CycleRateResolver::new(&self.settings.cycle, now);
        resolver.restore(OpenCyclePeriod::new(now, rate, label), Vec::new(), now);

        self.classifier =
            WorkClassifier::new(&self.settings.classifier, self.settings.cycle.rate_epsilon, now);
        self.resolver = resolver;
        self.speed = RotarySpeedMeter::new(self.settings.impulses_per_revolution, now);
        self.cost = CostAccountant::new(self.settings.air_factor);
        self.live = LiveEstimator::new();
        self.element_count = 0;
        self.last_tick = now;
        info!(at = %now, "Engine state reset for new shift");
    }

    /// Rebuild an engine from the last persisted snapshot.
    ///
    /// A snapshot without a measurement start (fresh or unrecoverable
    /// document) yields a fresh engine.
    pub fn hydrate(config: &LineConfig, snapshot: &OeeSnapshot, now: DateTime<Utc>) -> Self {
        let mut engine = Self::new(config, now);
        let internal = &snapshot.internal;
        let Some(start) = internal.start_measurement else {
            info!("Snapshot has no measurement start, starting fresh");
            return engine;
        };

        let rate = if snapshot.product.rate > 0.0 {
            snapshot.product.rate
        } else {
            config.cycle.default_rate
        };
        let open = internal
            .open_period
            .clone()
            .unwrap_or_else(|| OpenCyclePeriod::new(start, rate, snapshot.product.rule.clone()));
        // downtime while the process was gone is not work
        engine.resolver.restore(open, internal.cycle_history.clone(), now);

        let oee = &snapshot.oee;
        // pauses written without their opening rate compare against the product rate
        let pause = internal.pause.map(|mut p| {
            if p.rate_at_start <= 0.0 {
                p.rate_at_start = rate;
            }
            p
        });
        engine.classifier.restore(
            start,
            internal.element_last_time.unwrap_or(start),
            internal.first_element_seen,
            internal.prev_element,
            internal.committed_idle_secs,
            pause,
            internal.count_at_last_resume,
            TimeBuckets {
                measured: oee.measured_secs,
                work: oee.work_secs,
                idle: oee.idle_secs,
                changeover: oee.changeover_secs,
                changeover_temp: internal.changeover_temp_secs,
            },
        );
        engine.cost.restore(oee.energy_w, oee.air_m3, &snapshot.helpers_energy, &snapshot.helpers_air);
        engine.speed.restore(internal.rotary_speed_rpm, internal.prev_speed);
        engine.element_count = oee.element_count;
        engine.machine_on = internal.machine_on;
        engine.dimensions = Dimensions {
            length_calc: snapshot.product.length_calc,
            width_calc: snapshot.product.width_calc,
            height_calc: snapshot.product.height_calc,
        };

        info!(
            elements = engine.element_count,
            start = %start,
            periods = engine.resolver.history().len(),
            state = %engine.classifier.state(),
            "Engine state restored from snapshot"
        );
        engine
    }

    /// Deep copy of the state plus computed ratios.
    pub fn snapshot(&self, now: DateTime<Utc>) -> OeeSnapshot {
        let buckets = self.classifier.buckets();
        let figures = self.figures(now);
        let live = self.live.figures();
        let (energy_per_piece_w, air_per_piece_m3) = self.cost.per_piece(self.element_count);

        OeeSnapshot {
            timestamp: now,
            oee: OeeSection {
                measured_secs: buckets.measured,
                work_secs: buckets.work,
                idle_secs: buckets.idle,
                changeover_secs: buckets.changeover,
                element_count: self.element_count,
                availability: figures.availability,
                performance: figures.performance,
                quality: figures.quality,
                oee: figures.oee,
                energy_w: self.cost.energy_w(),
                air_m3: self.cost.air_m3(),
                energy_per_piece_w,
                air_per_piece_m3,
                availability_live: live.availability,
                performance_live: live.performance,
                oee_live: live.oee,
            },
            product: ProductSection {
                length_calc: self.dimensions.length_calc,
                width_calc: self.dimensions.width_calc,
                height_calc: self.dimensions.height_calc,
                rule: self.resolver.current_label().to_string(),
                rate: self.resolver.current_rate(),
            },
            internal: InternalSection {
                start_measurement: Some(self.classifier.start_measurement()),
                element_last_time: Some(self.classifier.element_last_time()),
                first_element_seen: self.classifier.first_element_seen(),
                prev_element: self.classifier.prev_element(),
                prev_speed: self.speed.prev_pulse(),
                machine_on: self.machine_on,
                working: self.classifier.is_working(),
                paused: self.classifier.pause().is_some(),
                committed_idle_secs: self.classifier.committed_idle(),
                changeover_temp_secs: buckets.changeover_temp,
                pause: self.classifier.pause().copied(),
                count_at_last_resume: self.classifier.count_at_last_resume(),
                rotary_speed_rpm: self.speed.rpm(),
                last_work_tick: Some(self.resolver.work_clock()),
                open_period: Some(self.resolver.open_period().clone()),
                cycle_history: self.resolver.history().to_vec(),
            },
            helpers_air: self.cost.air_helpers(),
            helpers_energy: self.cost.energy_helpers(),
            ..OeeSnapshot::default()
        }
    }

    pub fn state(&self) -> LineState {
        self.classifier.state()
    }

    pub fn buckets(&self) -> TimeBuckets {
        self.classifier.buckets()
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    pub fn current_rate(&self) -> f64 {
        self.resolver.current_rate()
    }

    pub fn rate_change_pending(&self) -> bool {
        self.resolver.rate_changed_pending()
    }

    pub fn cycle_history(&self) -> &[CyclePeriod] {
        self.resolver.history()
    }

    pub fn open_period(&self) -> &OpenCyclePeriod {
        self.resolver.open_period()
    }

    /// Elements per rate label for the running shift.
    pub fn elements_per_rate(&self) -> BTreeMap<String, u64> {
        self.resolver.elements_per_label()
    }

    pub fn cost(&self) -> &CostAccountant {
        &self.cost
    }

    pub fn last_tick(&self) -> DateTime<Utc> {
        self.last_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cost::EnergyReading;
    use chrono::Duration;

    fn frame(t: DateTime<Utc>, element: bool, length_raw: f64) -> SignalFrame {
        SignalFrame {
            timestamp: t,
            machine_on: true,
            element_present: element,
            speed_pulse: false,
            length_raw,
            width_raw: 3_000.0,
            height_raw: 1_050.0,
        }
    }

    /// Raw count giving `mm` after calibration.
    fn raw_length(mm: f64) -> f64 {
        (mm + 20.0) * 10.0
    }

    fn run(engine: &mut OeeEngine, t0: DateTime<Utc>, until_ms: i64, every_ms: i64, length: f64) {
        for ms in (0..=until_ms).step_by(50) {
            engine.tick(&frame(t0 + Duration::milliseconds(ms), ms % every_ms < 100, raw_length(length)));
        }
    }

    #[test]
    fn test_tick_counts_elements_and_resolves_rate() {
        let t0 = Utc::now();
        let mut engine = OeeEngine::new(&LineConfig::default(), t0);
        run(&mut engine, t0, 60_000, 4_000, 500.0);
        assert_eq!(engine.element_count(), 16);
        assert_eq!(engine.current_rate(), 15.0);
        assert_eq!(engine.state(), LineState::Working);
        let f = engine.figures(t0 + Duration::seconds(60));
        assert!(f.performance > 0.9, "steady 15/min line: {f:?}");
        assert!((f.availability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_hydrate_roundtrip() {
        let t0 = Utc::now();
        let config = LineConfig::default();
        let mut engine = OeeEngine::new(&config, t0);
        run(&mut engine, t0, 30_000, 4_000, 700.0);
        // stop long enough to open a pause
        for ms in (30_050..=50_000).step_by(50) {
            engine.tick(&frame(t0 + Duration::milliseconds(ms), false, raw_length(700.0)));
        }
        assert_eq!(engine.state(), LineState::Paused);
        let now = t0 + Duration::seconds(50);
        let snap = engine.snapshot(now);

        let json = serde_json::to_string(&snap).unwrap();
        let back: OeeSnapshot = serde_json::from_str(&json).unwrap();
        let restored = OeeEngine::hydrate(&config, &back, now);

        assert_eq!(restored.element_count(), engine.element_count());
        assert_eq!(restored.state(), LineState::Paused);
        assert_eq!(restored.current_rate(), 12.875);
        assert_eq!(restored.cycle_history(), engine.cycle_history());
        assert_eq!(restored.buckets(), engine.buckets());
    }

    #[test]
    fn test_hydrate_empty_snapshot_is_fresh() {
        let t0 = Utc::now();
        let engine = OeeEngine::hydrate(&LineConfig::default(), &OeeSnapshot::default(), t0);
        assert_eq!(engine.element_count(), 0);
        assert_eq!(engine.state(), LineState::NotStarted);
    }

    #[test]
    fn test_reset_zeroes_and_drops_baselines() {
        let t0 = Utc::now();
        let mut engine = OeeEngine::new(&LineConfig::default(), t0);
        let reading = |kwh: f64| CostReading {
            energy: Some(EnergyReading { devices: BTreeMap::from([("device_1".to_string(), kwh * 1_000.0)]) }),
            ..Default::default()
        };
        engine.observe_costs(&reading(10.0));
        run(&mut engine, t0, 30_000, 4_000, 500.0);
        engine.observe_costs(&reading(11.0));
        assert!((engine.cost().energy_w() - 1_000.0).abs() < 1e-9);

        let t1 = t0 + Duration::seconds(31);
        engine.reset(t1);
        let snap = engine.snapshot(t1);
        assert_eq!(snap.oee.element_count, 0);
        assert_eq!(snap.oee.measured_secs, 0.0);
        assert_eq!(snap.oee.energy_w, 0.0);
        assert!(snap.internal.pause.is_none());
        assert!(snap.internal.cycle_history.is_empty());
        assert_eq!(engine.current_rate(), 15.0);
        assert_eq!(engine.cost().energy_baseline(), None);

        assert_eq!(engine.observe_costs(&reading(11.5)), CostUpdate::BaselineCaptured);
        assert_eq!(engine.cost().energy_baseline(), Some(11_500.0));
    }

    #[test]
    fn test_observe_live_consumes_rate_change() {
        let t0 = Utc::now();
        let mut engine = OeeEngine::new(&LineConfig::default(), t0);
        engine.tick(&frame(t0, false, raw_length(500.0)));
        assert!(engine.rate_change_pending());
        let snap = engine.snapshot(t0);
        engine.observe_live(&snap, 10.0);
        assert!(!engine.rate_change_pending());
    }
}
