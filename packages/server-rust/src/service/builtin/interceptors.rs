//! Stock interceptors: trace propagation, request and audit logging, fault
//! logging and fault redaction.

use async_trait::async_trait;
use meshnode_core::metadata::keys;
use meshnode_core::{CallContext, Fault, FaultClass, Value};
use uuid::Uuid;

use crate::service::interceptor::{
    AfterInvokeHandler, BeforeSendHandler, ContextHandler, ExceptionHandler, HandlerError,
};

fn principal_id(ctx: &CallContext) -> &str {
    ctx.principal.as_ref().map_or("anonymous", |p| p.id.as_str())
}

/// Ensures every call carries a trace id, reusing an inbound `x-trace-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextHandler;

#[async_trait]
impl ContextHandler for TraceContextHandler {
    fn name(&self) -> &str {
        "trace-context"
    }

    async fn on_context(&self, ctx: &mut CallContext) -> Result<(), HandlerError> {
        let trace_id = match ctx.trace_id.take() {
            Some(id) => id,
            None => ctx
                .metadata
                .get(keys::TRACE_ID)
                .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string),
        };
        ctx.metadata.insert(keys::TRACE_ID, trace_id.clone());
        ctx.trace_id = Some(trace_id);
        Ok(())
    }
}

/// Logs each call as it is handed to dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogHandler;

#[async_trait]
impl BeforeSendHandler for RequestLogHandler {
    fn name(&self) -> &str {
        "request-log"
    }

    async fn before_send(&self, ctx: &mut CallContext) -> Result<(), HandlerError> {
        tracing::debug!(
            call_id = ctx.call_id,
            method = %ctx.method,
            principal = principal_id(ctx),
            "dispatching call"
        );
        Ok(())
    }
}

/// Records successful calls under the `audit` target. Leaves the value as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditHandler;

#[async_trait]
impl AfterInvokeHandler for AuditHandler {
    fn name(&self) -> &str {
        "audit"
    }

    async fn after_invoke(&self, ctx: &mut CallContext, value: Value) -> Result<Value, HandlerError> {
        tracing::info!(
            target: "audit",
            call_id = ctx.call_id,
            method = %ctx.method,
            principal = principal_id(ctx),
            "call succeeded"
        );
        Ok(value)
    }
}

/// Logs faults before they are returned. Pipeline defects log at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultLogHandler;

#[async_trait]
impl ExceptionHandler for FaultLogHandler {
    fn name(&self) -> &str {
        "fault-log"
    }

    async fn on_exception(&self, ctx: &CallContext, fault: Fault) -> Result<Fault, HandlerError> {
        match fault.class {
            FaultClass::Handler | FaultClass::Internal => tracing::error!(
                call_id = ctx.call_id,
                method = %ctx.method,
                fault = %fault,
                detail = fault.descriptor.detail.as_deref(),
                "call faulted"
            ),
            _ => tracing::info!(
                call_id = ctx.call_id,
                method = %ctx.method,
                fault = %fault,
                "call faulted"
            ),
        }
        Ok(fault)
    }
}

/// Strips node-internal diagnostics from faults sent to callers.
///
/// Business faults pass through untouched. Pipeline defects keep their kind
/// but get a generic message.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultRedactionHandler;

#[async_trait]
impl ExceptionHandler for FaultRedactionHandler {
    fn name(&self) -> &str {
        "fault-redaction"
    }

    async fn on_exception(&self, _ctx: &CallContext, mut fault: Fault) -> Result<Fault, HandlerError> {
        match fault.class {
            FaultClass::Dispatch => {}
            FaultClass::Handler | FaultClass::Internal => {
                fault.descriptor.message = "internal error".to_string();
                fault.descriptor.detail = None;
            }
            _ => fault.descriptor.detail = None,
        }
        Ok(fault)
    }
}
