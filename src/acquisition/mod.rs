//! Signal acquisition module
//!
//! Feed contracts, feed adapters and the sampler that turns raw telemetry
//! into typed signal frames.

pub mod feed;
pub mod sampler;
pub mod simulated;
pub mod values;

pub use feed::{
    DocumentMeterFeed, DocumentTelemetryFeed, FeedError, MeterFeed, StaticFeed, TelemetryFeed,
};
pub use sampler::SignalSampler;
pub use simulated::SimulatedLine;
pub use values::WarnThrottle;
