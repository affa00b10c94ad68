//! Stack composition: wraps the `CallService` with the call-level layers.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use crate::service::call_service::CallService;

/// The composed service the transport drives for every inbound call.
pub type CallStack = MetricsService<CallService>;

/// Build the call stack by wrapping the `CallService` with middleware layers.
///
/// Admission control and deadlines are not tower layers: their faults have
/// to pass through the exception stage, so they live inside the pipeline.
#[must_use]
pub fn build_call_stack(service: CallService) -> CallStack {
    ServiceBuilder::new().layer(MetricsLayer).service(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
