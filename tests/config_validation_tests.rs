//! Config Validation Tests
//!
//! Loads line configs from real files and checks that every invalid setting
//! is reported, that partial files keep the built-in defaults, and that the
//! process-wide config behaves as a set-once value.

use std::path::Path;

use line_oee::config::{self, ConfigError, LineConfig};

fn write(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("line_config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn validation_errors(result: Result<LineConfig, ConfigError>) -> Vec<String> {
    match result {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn partial_file_keeps_defaults_for_missing_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        r#"
[line]
name = "PRESS-7"

[shift]
timezone = "Europe/Berlin"

[storage]
data_dir = "/var/lib/press-7"
"#,
    );

    let config = LineConfig::load_from_file(&path).unwrap();
    assert_eq!(config.line.name, "PRESS-7");
    assert_eq!(config.shift.timezone, "Europe/Berlin");
    assert_eq!(config.shift.boundaries, vec!["06:00", "14:00", "22:00"]);
    assert_eq!(config.shift.length_hours, 8);
    assert_eq!(config.cycle.rules.len(), 4);
    assert_eq!(config.intervals.sample_ms, 50);
    assert_eq!(
        config.storage.snapshot_path(),
        Path::new("/var/lib/press-7").join("oee_snapshot.json")
    );
}

#[test]
fn saved_config_loads_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.toml");

    let mut config = LineConfig::default();
    config.line.name = "LINE-9".to_string();
    config.classifier.idle_timeout_secs = 12.5;
    config.cost.flow_ports = vec!["master2/port1".to_string()];
    config.shift.boundaries = vec!["07:00".to_string(), "19:00".to_string()];
    config.shift.length_hours = 12;
    config.shift.max_sleep_hours = 12;
    config.save_to_file(&path).unwrap();

    let back = LineConfig::load_from_file(&path).unwrap();
    assert_eq!(back.line.name, "LINE-9");
    assert!((back.classifier.idle_timeout_secs - 12.5).abs() < f64::EPSILON);
    assert_eq!(back.cost.flow_ports, vec!["master2/port1"]);
    assert_eq!(back.shift.boundaries, vec!["07:00", "19:00"]);
    assert_eq!(back.cycle.rules, config.cycle.rules);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match LineConfig::load_from_file(&path) {
        Err(ConfigError::Io(p, _)) => assert_eq!(p, path),
        other => panic!("expected I/O error, got {other:?}"),
    }
}

#[test]
fn type_mismatch_reports_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        r#"
[classifier]
idle_timeout_secs = "ten"
"#,
    );
    let err = LineConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(&err, ConfigError::Parse(p, _) if p == &path));
    assert!(err.to_string().contains("line_config.toml"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn unordered_rule_table_is_rejected() {
    let errors = validation_errors(LineConfig::from_toml_str(
        r#"
[cycle]
rules = [
    { max_length = 900.0, max_width = 400.0, rate = 16.0 },
    { max_length = 500.0, max_width = 400.0, rate = 20.0 },
]
"#,
    ));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("ascending max_length"));
}

#[test]
fn non_positive_rates_and_timeouts_are_rejected() {
    let errors = validation_errors(LineConfig::from_toml_str(
        r#"
[cycle]
default_rate = 0.0
rules = [{ max_length = 500.0, max_width = 400.0, rate = -1.0 }]

[classifier]
idle_timeout_secs = 0.0
max_changeover_secs = -5.0
"#,
    ));
    for field in [
        "cycle.default_rate",
        "cycle.rules[0].rate",
        "classifier.idle_timeout_secs",
        "classifier.max_changeover_secs",
    ] {
        assert!(errors.iter().any(|e| e.starts_with(field)), "{field} not reported: {errors:?}");
    }
}

#[test]
fn shift_calendar_errors_are_collected_together() {
    let errors = validation_errors(LineConfig::from_toml_str(
        r#"
[shift]
timezone = "Europe/Atlantis"
boundaries = ["22:00", "06:00", "25:00"]
length_hours = 8
max_sleep_hours = 4
"#,
    ));
    assert!(errors.iter().any(|e| e.contains("unknown timezone 'Europe/Atlantis'")));
    assert!(errors.iter().any(|e| e.contains("'25:00' is not HH:MM")));
    assert!(errors.iter().any(|e| e.contains("strictly ascending")));
    assert!(errors.iter().any(|e| e.contains("max_sleep_hours (4)")));
}

#[test]
fn empty_boundary_list_is_rejected() {
    let errors = validation_errors(LineConfig::from_toml_str(
        r#"
[shift]
boundaries = []
"#,
    ));
    assert!(errors.iter().any(|e| e.contains("at least one boundary")));
}

#[test]
fn zero_intervals_and_divisors_are_rejected() {
    let errors = validation_errors(LineConfig::from_toml_str(
        r#"
[calibration]
length_divisor = 0.0

[intervals]
sample_ms = 0
archive_secs = 0
"#,
    ));
    assert!(errors.iter().any(|e| e.starts_with("calibration.length_divisor")));
    assert!(errors.iter().any(|e| e.starts_with("intervals.sample_ms")));
    assert!(errors.iter().any(|e| e.starts_with("intervals.archive_secs")));
    assert_eq!(errors.len(), 3);
}

#[test]
fn validation_message_lists_every_problem() {
    let mut config = LineConfig::default();
    config.cost.air_factor = 0.0;
    config.signals.impulses_per_revolution = -1.0;
    let message = config.validate().unwrap_err().to_string();
    assert!(message.starts_with("Config validation failed:"));
    assert!(message.contains("  - cost.air_factor"));
    assert!(message.contains("  - signals.impulses_per_revolution"));
}

// ============================================================================
// Global Config
// ============================================================================

#[test]
fn global_config_is_set_once() {
    let mut first = LineConfig::default();
    first.line.name = "GLOBAL-1".to_string();
    config::init(first);
    assert!(config::is_initialized());
    assert_eq!(config::get().line.name, "GLOBAL-1");

    let mut second = LineConfig::default();
    second.line.name = "GLOBAL-2".to_string();
    config::init(second);
    assert_eq!(config::get().line.name, "GLOBAL-1", "later init calls are ignored");
}
