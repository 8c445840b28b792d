//! System-wide default constants.
//!
//! Every tunable in `LineConfig` starts from one of these values.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Cycle Rate
// ============================================================================

/// Production rate used when no dimension rule matches (elements/min).
pub const DEFAULT_CYCLE_RATE: f64 = 14.0;

/// Smallest rate difference treated as a real rate change (elements/min).
pub const RATE_EPSILON: f64 = 0.01;

/// Ordered `(max_length, max_width, rate)` rule table, ascending by length.
pub const CYCLE_RULES: [(f64, f64, f64); 4] = [
    (600.0, 9_999.0, 15.0),
    (800.0, 9_999.0, 12.875),
    (1_200.0, 9_999.0, 12.0),
    (99_999.0, 9_999.0, 7.06),
];

// ============================================================================
// Calibration (raw analog counts -> millimetres)
// ============================================================================

pub const LENGTH_DIVISOR: f64 = 10.0;
pub const LENGTH_OFFSET: f64 = -20.0;
pub const WIDTH_DIVISOR: f64 = 10.0;
pub const WIDTH_OFFSET: f64 = 100.0;
pub const HEIGHT_DIVISOR: f64 = 100.0;
pub const HEIGHT_OFFSET: f64 = -5.5;

// ============================================================================
// Classifier
// ============================================================================

/// Gap after the last element before the line is judged paused (seconds).
pub const IDLE_TIMEOUT_SECS: f64 = 10.0;

/// Longest pause that can still be classified as a changeover (seconds).
pub const MAX_CHANGEOVER_SECS: f64 = 600.0;

// ============================================================================
// Signals
// ============================================================================

/// Speed sensor pulses per shaft revolution.
pub const IMPULSES_PER_REVOLUTION: f64 = 8.0;

/// Minimum window between rotary speed recomputations (milliseconds).
pub const SPEED_WINDOW_MS: i64 = 1_000;

/// Malformed-field warnings are emitted at most once per source in this window.
pub const MALFORMED_WARN_INTERVAL_SECS: u64 = 30;

pub const SIGNAL_GROUP: &str = "master1/port1";
pub const DIMENSION_GROUP: &str = "master1/port2";

// ============================================================================
// Cost
// ============================================================================

/// Flow totaliser to cubic metres conversion factor.
pub const AIR_FACTOR: f64 = 1.0;

pub const FLOW_PORTS: [&str; 5] = [
    "master1/port3",
    "master1/port4",
    "master2/port0",
    "master2/port1",
    "master2/port2",
];

pub const TOTALISER_FIELD: &str = "totaliser";

pub const ENERGY_DEVICES: [&str; 3] = ["device_1", "device_2", "device_3"];

/// Meter record carrying the cumulative active energy counter.
pub const ENERGY_RECORD_ID: &str = "ea_pos_total";

// ============================================================================
// Task Intervals
// ============================================================================

pub const SAMPLE_INTERVAL_MS: u64 = 50;
pub const SNAPSHOT_FLUSH_INTERVAL_MS: u64 = 1_000;
pub const COST_INTERVAL_SECS: u64 = 10;
pub const LIVE_ESTIMATOR_INTERVAL_SECS: u64 = 10;
pub const ARCHIVE_INTERVAL_SECS: u64 = 5;

// ============================================================================
// Shift
// ============================================================================

pub const SHIFT_TIMEZONE: &str = "Europe/Warsaw";
pub const SHIFT_BOUNDARIES: [&str; 3] = ["06:00", "14:00", "22:00"];
pub const SHIFT_LENGTH_HOURS: i64 = 8;

/// Upper clamp on a single sleep-until-boundary (hours).
pub const MAX_SHIFT_SLEEP_HOURS: i64 = 26;

// ============================================================================
// Storage
// ============================================================================

pub const DATA_DIR: &str = "./data";
pub const SNAPSHOT_FILE: &str = "oee_snapshot.json";
pub const SUMMARY_FILE: &str = "shift_summary.json";
pub const ARCHIVE_DB: &str = "archive.sled";
pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const METERS_FILE: &str = "meters.json";

/// Snapshot document layout version.
pub const SNAPSHOT_VERSION: u32 = 1;
