//! Per-iteration panic guard.
//!
//! Wraps a single loop iteration, never the loop, so a fault in one tick
//! is logged and the next tick runs normally.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Run one iteration; a panic is logged and mapped to `None`.
pub async fn guarded<F, T>(task: &'static str, iteration: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(iteration).catch_unwind().await {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(task, panic = %panic_message(payload.as_ref()), "Iteration panicked, continuing with next tick");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
