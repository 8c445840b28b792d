//! Shift handling
//!
//! - `calendar`: local boundaries, the just-ended window, sleep clamp
//! - `baselines`: per-channel start values of the external counters
//! - `summary`: summary assembly from the engine snapshot
//! - `scheduler`: the boundary state machine (summary, archive, reset)

pub mod baselines;
pub mod calendar;
pub mod scheduler;
pub mod summary;

pub use baselines::{CounterBaselines, CounterReadings};
pub use calendar::ShiftCalendar;
pub use scheduler::{FinalizeOutcome, ShiftScheduler};
pub use summary::{build_summary, SummaryInputs};
