//! HTTP handlers for the node.
//!
//! `AppState` carries the shared call stack and lifecycle handles through
//! axum's `State` extractor. Every field is cheap to clone.

pub mod health;
pub mod invoke;
pub mod subscribe;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use invoke::invoke_handler;
pub use subscribe::subscribe_handler;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::{NodeConfig, ShutdownController};
use crate::service::{CallStack, PipelineRegistration};

/// Shared application state passed to all axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Metrics-instrumented call service.
    pub calls: CallStack,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NodeConfig>,
    /// Sealed pipeline registration, read for subscriptions and health.
    pub registration: Arc<PipelineRegistration>,
    /// Process start time, for uptime.
    pub start_time: Instant,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("health", &self.shutdown.health_state())
            .field("in_flight", &self.shutdown.in_flight_count())
            .field("registration", &self.registration)
            .field("uptime", &self.start_time.elapsed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Instant;

    use super::AppState;
    use crate::network::{NodeConfig, ShutdownController};
    use crate::service::domain::register_sample_methods;
    use crate::service::{
        build_call_stack, CallService, Dispatcher, InterceptorPipeline, PipelineRegistry,
    };

    /// State over a registry with the sample methods and one subscription.
    pub(crate) fn app_state(config: NodeConfig) -> AppState {
        let registry = PipelineRegistry::new();
        let mut dispatcher = Dispatcher::new();
        register_sample_methods("test-node", &registry, &mut dispatcher).unwrap();
        registry.register_subscription("orders", "Echo").unwrap();
        let registration = registry.seal().unwrap();

        let pipeline = InterceptorPipeline::new(
            Arc::clone(&registration),
            Arc::new(dispatcher),
            config.service.max_concurrent_calls,
        );
        let calls = build_call_stack(CallService::new(
            Arc::new(pipeline),
            Arc::new(config.service.clone()),
        ));

        AppState {
            calls,
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(config),
            registration,
            start_time: Instant::now(),
        }
    }

    #[test]
    fn app_state_debug_reports_health() {
        let state = app_state(NodeConfig::default());
        let rendered = format!("{state:?}");
        assert!(rendered.contains("Starting"));
        assert!(rendered.contains("in_flight: 0"));
    }
}
