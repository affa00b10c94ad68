//! Tower middleware layers for the call stack.
//!
//! - [`metrics`]: Call timing and outcome counting
//! - [`stack`]: Composes all layers around the `CallService`

pub mod metrics;
pub mod stack;

pub use metrics::MetricsLayer;
pub use stack::{build_call_stack, CallStack};
