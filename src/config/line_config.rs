//! Line Configuration - every engine constant as an operator-tunable TOML value
//!
//! Each struct implements `Default` with the values from `defaults`, so a
//! missing file or a partial file behaves exactly like the built-in setup.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::CycleRule;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "LINE_OEE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "line_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one production line.
///
/// Load with `LineConfig::load()` which searches:
/// 1. `$LINE_OEE_CONFIG` env var
/// 2. `./line_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineConfig {
    /// Line identification
    #[serde(default)]
    pub line: LineInfo,

    /// Dimension -> production rate rules
    #[serde(default)]
    pub cycle: CycleConfig,

    /// Raw analog count calibration
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Idle / changeover classification
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Where each signal lives in the telemetry feed
    #[serde(default)]
    pub signals: SignalConfig,

    /// Energy and air accounting
    #[serde(default)]
    pub cost: CostConfig,

    /// Task periods
    #[serde(default)]
    pub intervals: IntervalConfig,

    /// Shift calendar
    #[serde(default)]
    pub shift: ShiftConfig,

    /// File and database locations
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$LINE_OEE_CONFIG` environment variable
    /// 2. `./line_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), line = %config.line.name, "Loaded line config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(line = %config.line.name, "Loaded line config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let c = &self.cycle;
        Self::check_positive(c.default_rate, "cycle.default_rate", &mut errors);
        Self::check_positive(c.rate_epsilon, "cycle.rate_epsilon", &mut errors);
        for (i, rule) in c.rules.iter().enumerate() {
            Self::check_positive(rule.rate, &format!("cycle.rules[{i}].rate"), &mut errors);
            if !rule.max_length.is_finite() || !rule.max_width.is_finite() {
                errors.push(format!("cycle.rules[{i}]: limits must be finite"));
            }
        }
        if c.rules.windows(2).any(|w| w[1].max_length < w[0].max_length) {
            errors.push("cycle.rules: must be ordered by ascending max_length".to_string());
        }

        let cal = &self.calibration;
        for (name, divisor) in [
            ("calibration.length_divisor", cal.length_divisor),
            ("calibration.width_divisor", cal.width_divisor),
            ("calibration.height_divisor", cal.height_divisor),
        ] {
            if !divisor.is_finite() || divisor == 0.0 {
                errors.push(format!("{name}: must be finite and non-zero (got {divisor})"));
            }
        }

        Self::check_positive(
            self.classifier.idle_timeout_secs,
            "classifier.idle_timeout_secs",
            &mut errors,
        );
        Self::check_positive(
            self.classifier.max_changeover_secs,
            "classifier.max_changeover_secs",
            &mut errors,
        );
        Self::check_positive(
            self.signals.impulses_per_revolution,
            "signals.impulses_per_revolution",
            &mut errors,
        );
        Self::check_positive(self.cost.air_factor, "cost.air_factor", &mut errors);

        let iv = &self.intervals;
        for (name, value) in [
            ("intervals.sample_ms", iv.sample_ms),
            ("intervals.snapshot_flush_ms", iv.snapshot_flush_ms),
            ("intervals.cost_secs", iv.cost_secs),
            ("intervals.live_estimator_secs", iv.live_estimator_secs),
            ("intervals.archive_secs", iv.archive_secs),
        ] {
            if value == 0 {
                errors.push(format!("{name}: must be > 0"));
            }
        }

        let s = &self.shift;
        if s.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(format!("shift.timezone: unknown timezone '{}'", s.timezone));
        }
        if s.boundaries.is_empty() {
            errors.push("shift.boundaries: at least one boundary is required".to_string());
        }
        let mut parsed: Vec<NaiveTime> = Vec::new();
        for b in &s.boundaries {
            match NaiveTime::parse_from_str(b, "%H:%M") {
                Ok(t) => parsed.push(t),
                Err(_) => errors.push(format!("shift.boundaries: '{b}' is not HH:MM")),
            }
        }
        if parsed.windows(2).any(|w| w[1] <= w[0]) {
            errors.push("shift.boundaries: must be strictly ascending".to_string());
        }
        if s.length_hours <= 0 {
            errors.push(format!("shift.length_hours: must be > 0 (got {})", s.length_hours));
        }
        if s.max_sleep_hours < s.length_hours {
            errors.push(format!(
                "shift.max_sleep_hours ({}) must be >= shift.length_hours ({})",
                s.max_sleep_hours, s.length_hours
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, so check finiteness first
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name}: must be finite and > 0 (got {value})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Line Info
// ============================================================================

/// Identification metadata, shown in logs and summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineInfo {
    #[serde(default = "default_line_name")]
    pub name: String,
}

fn default_line_name() -> String {
    "LINE-1".to_string()
}

impl Default for LineInfo {
    fn default() -> Self {
        Self { name: default_line_name() }
    }
}

// ============================================================================
// Cycle
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Rate used when no rule matches (elements/min)
    #[serde(default = "default_cycle_rate")]
    pub default_rate: f64,

    /// Minimum difference that counts as a rate change
    #[serde(default = "default_rate_epsilon")]
    pub rate_epsilon: f64,

    /// Ordered rule table, first match wins
    #[serde(default = "default_cycle_rules")]
    pub rules: Vec<CycleRule>,
}

fn default_cycle_rate() -> f64 { defaults::DEFAULT_CYCLE_RATE }
fn default_rate_epsilon() -> f64 { defaults::RATE_EPSILON }
fn default_cycle_rules() -> Vec<CycleRule> {
    defaults::CYCLE_RULES
        .iter()
        .map(|&(max_length, max_width, rate)| CycleRule { max_length, max_width, rate })
        .collect()
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            default_rate: default_cycle_rate(),
            rate_epsilon: default_rate_epsilon(),
            rules: default_cycle_rules(),
        }
    }
}

// ============================================================================
// Calibration
// ============================================================================

/// `value = raw / divisor + offset` for each analog dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_length_divisor")]
    pub length_divisor: f64,
    #[serde(default = "default_length_offset")]
    pub length_offset: f64,
    #[serde(default = "default_width_divisor")]
    pub width_divisor: f64,
    #[serde(default = "default_width_offset")]
    pub width_offset: f64,
    #[serde(default = "default_height_divisor")]
    pub height_divisor: f64,
    #[serde(default = "default_height_offset")]
    pub height_offset: f64,
}

fn default_length_divisor() -> f64 { defaults::LENGTH_DIVISOR }
fn default_length_offset() -> f64 { defaults::LENGTH_OFFSET }
fn default_width_divisor() -> f64 { defaults::WIDTH_DIVISOR }
fn default_width_offset() -> f64 { defaults::WIDTH_OFFSET }
fn default_height_divisor() -> f64 { defaults::HEIGHT_DIVISOR }
fn default_height_offset() -> f64 { defaults::HEIGHT_OFFSET }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            length_divisor: default_length_divisor(),
            length_offset: default_length_offset(),
            width_divisor: default_width_divisor(),
            width_offset: default_width_offset(),
            height_divisor: default_height_divisor(),
            height_offset: default_height_offset(),
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Gap after the last element before a pause opens (seconds)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: f64,

    /// Longest pause still eligible for changeover (seconds)
    #[serde(default = "default_max_changeover")]
    pub max_changeover_secs: f64,
}

fn default_idle_timeout() -> f64 { defaults::IDLE_TIMEOUT_SECS }
fn default_max_changeover() -> f64 { defaults::MAX_CHANGEOVER_SECS }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_changeover_secs: default_max_changeover(),
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Location of one field in the telemetry feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSource {
    pub group: String,
    pub field: String,
}

impl SignalSource {
    pub fn new(group: &str, field: &str) -> Self {
        Self { group: group.to_string(), field: field.to_string() }
    }

    /// `group.field`, used as the throttling key for warnings.
    pub fn key(&self) -> String {
        format!("{}.{}", self.group, self.field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_machine_on")]
    pub machine_on: SignalSource,
    #[serde(default = "default_element_present")]
    pub element_present: SignalSource,
    #[serde(default = "default_speed_pulse")]
    pub speed_pulse: SignalSource,
    #[serde(default = "default_length_raw")]
    pub length_raw: SignalSource,
    #[serde(default = "default_width_raw")]
    pub width_raw: SignalSource,
    #[serde(default = "default_height_raw")]
    pub height_raw: SignalSource,

    /// Speed sensor pulses per revolution
    #[serde(default = "default_impulses_per_revolution")]
    pub impulses_per_revolution: f64,
}

fn default_machine_on() -> SignalSource { SignalSource::new(defaults::SIGNAL_GROUP, "machine_on") }
fn default_element_present() -> SignalSource { SignalSource::new(defaults::SIGNAL_GROUP, "element_present") }
fn default_speed_pulse() -> SignalSource { SignalSource::new(defaults::SIGNAL_GROUP, "speed_pulse") }
fn default_length_raw() -> SignalSource { SignalSource::new(defaults::DIMENSION_GROUP, "length_raw") }
fn default_width_raw() -> SignalSource { SignalSource::new(defaults::DIMENSION_GROUP, "width_raw") }
fn default_height_raw() -> SignalSource { SignalSource::new(defaults::DIMENSION_GROUP, "height_raw") }
fn default_impulses_per_revolution() -> f64 { defaults::IMPULSES_PER_REVOLUTION }

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            machine_on: default_machine_on(),
            element_present: default_element_present(),
            speed_pulse: default_speed_pulse(),
            length_raw: default_length_raw(),
            width_raw: default_width_raw(),
            height_raw: default_height_raw(),
            impulses_per_revolution: default_impulses_per_revolution(),
        }
    }
}

// ============================================================================
// Cost
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Totaliser units -> m³
    #[serde(default = "default_air_factor")]
    pub air_factor: f64,

    /// Telemetry groups carrying an air-flow totaliser
    #[serde(default = "default_flow_ports")]
    pub flow_ports: Vec<String>,

    #[serde(default = "default_totaliser_field")]
    pub totaliser_field: String,

    /// Energy analyzer device ids in the meter feed
    #[serde(default = "default_energy_devices")]
    pub energy_devices: Vec<String>,

    #[serde(default = "default_energy_record_id")]
    pub energy_record_id: String,
}

fn default_air_factor() -> f64 { defaults::AIR_FACTOR }
fn default_flow_ports() -> Vec<String> { defaults::FLOW_PORTS.iter().map(|s| (*s).to_string()).collect() }
fn default_totaliser_field() -> String { defaults::TOTALISER_FIELD.to_string() }
fn default_energy_devices() -> Vec<String> { defaults::ENERGY_DEVICES.iter().map(|s| (*s).to_string()).collect() }
fn default_energy_record_id() -> String { defaults::ENERGY_RECORD_ID.to_string() }

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            air_factor: default_air_factor(),
            flow_ports: default_flow_ports(),
            totaliser_field: default_totaliser_field(),
            energy_devices: default_energy_devices(),
            energy_record_id: default_energy_record_id(),
        }
    }
}

// ============================================================================
// Intervals
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default = "default_sample_ms")]
    pub sample_ms: u64,
    #[serde(default = "default_snapshot_flush_ms")]
    pub snapshot_flush_ms: u64,
    #[serde(default = "default_cost_secs")]
    pub cost_secs: u64,
    #[serde(default = "default_live_estimator_secs")]
    pub live_estimator_secs: u64,
    #[serde(default = "default_archive_secs")]
    pub archive_secs: u64,
}

fn default_sample_ms() -> u64 { defaults::SAMPLE_INTERVAL_MS }
fn default_snapshot_flush_ms() -> u64 { defaults::SNAPSHOT_FLUSH_INTERVAL_MS }
fn default_cost_secs() -> u64 { defaults::COST_INTERVAL_SECS }
fn default_live_estimator_secs() -> u64 { defaults::LIVE_ESTIMATOR_INTERVAL_SECS }
fn default_archive_secs() -> u64 { defaults::ARCHIVE_INTERVAL_SECS }

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            sample_ms: default_sample_ms(),
            snapshot_flush_ms: default_snapshot_flush_ms(),
            cost_secs: default_cost_secs(),
            live_estimator_secs: default_live_estimator_secs(),
            archive_secs: default_archive_secs(),
        }
    }
}

// ============================================================================
// Shift
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// IANA timezone the boundaries are expressed in
    #[serde(default = "default_shift_timezone")]
    pub timezone: String,

    /// Local wall-clock boundaries, `HH:MM`, ascending
    #[serde(default = "default_shift_boundaries")]
    pub boundaries: Vec<String>,

    #[serde(default = "default_shift_length_hours")]
    pub length_hours: i64,

    #[serde(default = "default_max_sleep_hours")]
    pub max_sleep_hours: i64,
}

fn default_shift_timezone() -> String { defaults::SHIFT_TIMEZONE.to_string() }
fn default_shift_boundaries() -> Vec<String> { defaults::SHIFT_BOUNDARIES.iter().map(|s| (*s).to_string()).collect() }
fn default_shift_length_hours() -> i64 { defaults::SHIFT_LENGTH_HOURS }
fn default_max_sleep_hours() -> i64 { defaults::MAX_SHIFT_SLEEP_HOURS }

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            timezone: default_shift_timezone(),
            boundaries: default_shift_boundaries(),
            length_hours: default_shift_length_hours(),
            max_sleep_hours: default_max_sleep_hours(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    #[serde(default = "default_summary_file")]
    pub summary_file: String,
    #[serde(default = "default_archive_db")]
    pub archive_db: String,
    #[serde(default = "default_telemetry_file")]
    pub telemetry_file: String,
    #[serde(default = "default_meters_file")]
    pub meters_file: String,
}

fn default_data_dir() -> PathBuf { PathBuf::from(defaults::DATA_DIR) }
fn default_snapshot_file() -> String { defaults::SNAPSHOT_FILE.to_string() }
fn default_summary_file() -> String { defaults::SUMMARY_FILE.to_string() }
fn default_archive_db() -> String { defaults::ARCHIVE_DB.to_string() }
fn default_telemetry_file() -> String { defaults::TELEMETRY_FILE.to_string() }
fn default_meters_file() -> String { defaults::METERS_FILE.to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_file: default_snapshot_file(),
            summary_file: default_summary_file(),
            archive_db: default_archive_db(),
            telemetry_file: default_telemetry_file(),
            meters_file: default_meters_file(),
        }
    }
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> PathBuf { self.data_dir.join(&self.snapshot_file) }
    pub fn summary_path(&self) -> PathBuf { self.data_dir.join(&self.summary_file) }
    pub fn archive_path(&self) -> PathBuf { self.data_dir.join(&self.archive_db) }
    pub fn telemetry_path(&self) -> PathBuf { self.data_dir.join(&self.telemetry_file) }
    pub fn meters_path(&self) -> PathBuf { self.data_dir.join(&self.meters_file) }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle.rules.len(), 4);
        assert!((config.cycle.rules[1].rate - 12.875).abs() < f64::EPSILON);
        assert_eq!(config.shift.boundaries, vec!["06:00", "14:00", "22:00"]);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
[line]
name = "PRESS-7"

[classifier]
idle_timeout_secs = 15.0
"#;
        let config = LineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.line.name, "PRESS-7");
        assert!((config.classifier.idle_timeout_secs - 15.0).abs() < f64::EPSILON);
        assert!((config.classifier.max_changeover_secs - 600.0).abs() < f64::EPSILON);
        assert_eq!(config.cost.energy_devices.len(), 3);
    }

    #[test]
    fn test_rule_table_replaces_defaults() {
        let toml_str = r#"
[cycle]
default_rate = 10.0
rules = [
    { max_length = 500.0, max_width = 400.0, rate = 20.0 },
    { max_length = 900.0, max_width = 400.0, rate = 16.0 },
]
"#;
        let config = LineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.cycle.rules.len(), 2);
        assert!((config.cycle.rules[0].rate - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unordered_rules_rejected() {
        let mut config = LineConfig::default();
        config.cycle.rules.swap(0, 3);
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("ascending max_length")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_shift_settings_collected_together() {
        let mut config = LineConfig::default();
        config.shift.timezone = "Mars/Olympus".to_string();
        config.shift.boundaries = vec!["14:00".to_string(), "6am".to_string()];
        config.intervals.cost_secs = 0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("unknown timezone")));
                assert!(errors.iter().any(|e| e.contains("'6am' is not HH:MM")));
                assert!(errors.iter().any(|e| e.contains("intervals.cost_secs")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_divisor_rejected() {
        let mut config = LineConfig::default();
        config.calibration.width_divisor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_rules() {
        let config = LineConfig::default();
        let text = config.to_toml().unwrap();
        let back = LineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.cycle.rules, config.cycle.rules);
        assert_eq!(back.storage.snapshot_path(), config.storage.snapshot_path());
    }
}
