//! Line Configuration Module
//!
//! Provides per-line configuration loaded from TOML files: the cycle-rate rule
//! table, classifier timeouts, cost factors, shift calendar and file paths.
//!
//! ## Loading Order
//!
//! 1. `LINE_OEE_CONFIG` environment variable (path to TOML file)
//! 2. `line_config.toml` in the current working directory
//! 3. Built-in defaults (see `defaults`)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(LineConfig::load());
//!
//! let timeout = config::get().classifier.idle_timeout_secs;
//! ```

mod line_config;
pub mod defaults;

pub use line_config::*;

use std::sync::OnceLock;

/// Global line configuration, initialized once at startup.
static LINE_CONFIG: OnceLock<LineConfig> = OnceLock::new();

/// Initialize the global line configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: LineConfig) {
    if LINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global line configuration.
///
/// Falls back to built-in defaults when `init()` was never called (tests,
/// embedded use of the library).
pub fn get() -> &'static LineConfig {
    LINE_CONFIG.get_or_init(LineConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    LINE_CONFIG.get().is_some()
}
