//! HTTP front end: configuration, middleware, handlers, lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{ConfigError, NodeConfig, TracingHeaders};
pub use handlers::AppState;
pub use module::{build_router, NodeServer, DRAIN_TIMEOUT};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
