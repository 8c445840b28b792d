//! line-oee: Production-line OEE engine
//!
//! Turns live machine signals into working / idle / changeover time, tracks
//! the production rate of the current product, accounts energy and air usage
//! and rolls everything into per-shift summaries.
//!
//! ## Architecture
//!
//! - **Acquisition**: feed contracts and the sampler that builds typed signal frames
//! - **Engine**: cycle-rate resolver, classifier, metrics, cost accountant
//! - **Shift**: calendar, counter baselines, summary builder, scheduler
//! - **Storage**: JSON documents with backup/repair, sled-backed archive
//! - **Pipeline**: the concurrent task loops sharing one engine

pub mod acquisition;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod shift;
pub mod storage;
pub mod types;

// Re-export line configuration
pub use config::LineConfig;

// Re-export the engine aggregate
pub use engine::{LineState, OeeEngine, SharedEngine, TickOutcome};

// Re-export commonly used types
pub use types::{OeeSample, OeeSnapshot, ShiftSummary, SignalFrame};

// Re-export storage
pub use storage::{ArchiveError, ArchiveSink, InMemoryArchive, JsonDocumentStore, SledArchive, StoreError};
