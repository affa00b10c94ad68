//! Inbound call, outbound reply, and the fault taxonomy of the pipeline.

use std::fmt;

use meshnode_core::fault::kinds;
use meshnode_core::{CallOutcome, Fault, FaultClass, FaultDescriptor, Metadata, Value};

/// Interceptor stage roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Context,
    BeforeSend,
    AfterInvoke,
    Exception,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::BeforeSend => "before_send",
            Self::AfterInvoke => "after_invoke",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call as received from the transport, before a `CallContext` exists.
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// Target method identifier.
    pub method: String,
    /// Decoded payload.
    pub payload: Value,
    /// Headers already restricted to the tracing-header allow-list.
    pub metadata: Metadata,
    /// Trace id supplied by the caller, if any.
    pub trace_id: Option<String>,
    /// Overrides the node's default call timeout.
    pub timeout_ms: Option<u64>,
    /// Set when the transport could not decode the request body. The call
    /// still flows through the exception stage.
    pub decode_error: Option<String>,
}

impl InboundCall {
    #[must_use]
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            payload,
            metadata: Metadata::new(),
            trace_id: None,
            timeout_ms: None,
            decode_error: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Final result of a call, handed back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    Success(Value),
    Fault(Fault),
}

impl CallReply {
    /// Converts a terminal `CallOutcome`. A still-pending outcome means the
    /// pipeline lost track of the call and is reported as an internal fault.
    #[must_use]
    pub fn from_outcome(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Success(value) => Self::Success(value),
            CallOutcome::Fault(fault) => Self::Fault(fault),
            CallOutcome::Pending => Self::Fault(
                CallFault::InternalPipelineFault {
                    message: "call finished without an outcome".to_string(),
                }
                .into_fault(),
            ),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(f) => Some(f),
            Self::Success(_) => None,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success(_) => 200,
            Self::Fault(f) => f.class.status_code(),
        }
    }
}

/// Faults raised while a call moves through the pipeline.
///
/// Every variant ends up in the exception stage, which turns it into a
/// terminal [`Fault`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallFault {
    #[error("authorization rejected: {reason}")]
    AuthorizationRejected { reason: String },
    #[error("{stage} handler `{handler}` failed: {message}")]
    PipelineHandlerFault {
        stage: Stage,
        handler: String,
        message: String,
        detail: Option<String>,
    },
    #[error("internal pipeline fault: {message}")]
    InternalPipelineFault { message: String },
    #[error("dispatch fault: {0}")]
    Dispatch(FaultDescriptor),
    #[error("unknown method: {method}")]
    UnknownMethod { method: String },
    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("call cancelled by the transport")]
    Cancelled,
    #[error("node overloaded, try again later")]
    Overloaded,
    #[error("bad request: {message}")]
    BadRequest { message: String },
}

impl CallFault {
    #[must_use]
    pub fn class(&self) -> FaultClass {
        match self {
            Self::AuthorizationRejected { .. } => FaultClass::Authorization,
            Self::PipelineHandlerFault { .. } => FaultClass::Handler,
            Self::InternalPipelineFault { .. } => FaultClass::Internal,
            Self::Dispatch(_) => FaultClass::Dispatch,
            Self::UnknownMethod { .. } => FaultClass::UnknownMethod,
            Self::Timeout { .. } => FaultClass::Timeout,
            Self::Cancelled => FaultClass::Cancelled,
            Self::Overloaded => FaultClass::Overloaded,
            Self::BadRequest { .. } => FaultClass::BadRequest,
        }
    }

    /// Builds the classified fault descriptor handed to exception handlers.
    #[must_use]
    pub fn into_fault(self) -> Fault {
        let class = self.class();
        let descriptor = match self {
            Self::AuthorizationRejected { reason } => {
                FaultDescriptor::new(kinds::AUTHORIZATION_REJECTED, reason)
            }
            Self::PipelineHandlerFault {
                stage,
                handler,
                message,
                detail,
            } => {
                let mut fd = FaultDescriptor::new(
                    kinds::PIPELINE_HANDLER_FAULT,
                    format!("{stage} handler `{handler}` failed: {message}"),
                );
                fd.detail = detail;
                fd
            }
            Self::InternalPipelineFault { message } => {
                FaultDescriptor::new(kinds::INTERNAL_PIPELINE_FAULT, message)
            }
            Self::Dispatch(fd) => fd,
            Self::UnknownMethod { method } => {
                FaultDescriptor::new(kinds::UNKNOWN_METHOD, format!("unknown method: {method}"))
            }
            Self::Timeout { timeout_ms } => FaultDescriptor::new(
                kinds::TIMEOUT,
                format!("call timed out after {timeout_ms}ms"),
            ),
            Self::Cancelled => {
                FaultDescriptor::new(kinds::CANCELLED, "call cancelled by the transport")
            }
            Self::Overloaded => {
                FaultDescriptor::new(kinds::OVERLOADED, "node overloaded, try again later")
            }
            Self::BadRequest { message } => FaultDescriptor::new(kinds::BAD_REQUEST, message),
        };
        Fault::new(class, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_rejection_keeps_reason_as_message() {
        let fault = CallFault::AuthorizationRejected {
            reason: "unauthenticated".to_string(),
        }
        .into_fault();
        assert_eq!(fault.class, FaultClass::Authorization);
        assert_eq!(fault.kind(), "AuthorizationRejected");
        assert_eq!(fault.descriptor.message, "unauthenticated");
    }

    #[test]
    fn dispatch_fault_passes_business_descriptor_verbatim() {
        let fd = FaultDescriptor::new("NotFound", "no account 7").with_detail("id=7");
        let fault = CallFault::Dispatch(fd.clone()).into_fault();
        assert_eq!(fault.class, FaultClass::Dispatch);
        assert_eq!(fault.descriptor, fd);
    }

    #[test]
    fn handler_fault_names_stage_and_handler() {
        let fault = CallFault::PipelineHandlerFault {
            stage: Stage::BeforeSend,
            handler: "inject".to_string(),
            message: "boom".to_string(),
            detail: None,
        }
        .into_fault();
        assert_eq!(fault.class, FaultClass::Handler);
        assert_eq!(
            fault.descriptor.message,
            "before_send handler `inject` failed: boom"
        );
    }

    #[test]
    fn pending_outcome_becomes_internal_fault() {
        let reply = CallReply::from_outcome(CallOutcome::Pending);
        assert_eq!(reply.fault().map(|f| f.class), Some(FaultClass::Internal));
        assert_eq!(reply.status_code(), 500);
    }
}
