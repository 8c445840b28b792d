//! Shared data types
//!
//! Typed records flowing between the sampler, the engine, the shift
//! scheduler and the storage adapters.

mod cycle;
mod feed;
mod shift;
mod signal;
mod snapshot;

pub use cycle::*;
pub use feed::*;
pub use shift::*;
pub use signal::*;
pub use snapshot::*;
