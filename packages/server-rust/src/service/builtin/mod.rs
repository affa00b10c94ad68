//! Stock filters and interceptors.

pub mod auth;
pub mod interceptors;

use std::sync::Arc;

pub use auth::{AuthIgnoreFilter, AuthenticationFilter, Claims, RequireRoleFilter};
pub use interceptors::{
    AuditHandler, FaultLogHandler, FaultRedactionHandler, RequestLogHandler, TraceContextHandler,
};

use super::config::ServiceConfig;
use super::registration::{PipelineRegistry, RegistrationError};

/// Registers the default interceptor set.
///
/// Fault logging runs ahead of redaction so logs keep the full diagnostics.
/// Redaction is skipped when `expose_fault_detail` is set.
///
/// # Errors
///
/// Returns `RegistrationError::Misuse` if `registry` is already sealed.
pub fn register_default_interceptors(
    registry: &PipelineRegistry,
    config: &ServiceConfig,
) -> Result<(), RegistrationError> {
    registry.register_pipeline_handler(
        Some(Arc::new(TraceContextHandler)),
        Some(Arc::new(RequestLogHandler)),
        Some(Arc::new(AuditHandler)),
        Some(Arc::new(FaultLogHandler)),
    )?;
    if !config.expose_fault_detail {
        registry.register_pipeline_handler(None, None, None, Some(Arc::new(FaultRedactionHandler)))?;
    }
    Ok(())
}
