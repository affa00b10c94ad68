//! Fault descriptors returned to callers instead of a success payload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default `kind` strings used when a fault is raised by the node itself
/// rather than by a business method.
pub mod kinds {
    pub const AUTHORIZATION_REJECTED: &str = "AuthorizationRejected";
    pub const PIPELINE_HANDLER_FAULT: &str = "PipelineHandlerFault";
    pub const INTERNAL_PIPELINE_FAULT: &str = "InternalPipelineFault";
    pub const DISPATCH_FAULT: &str = "DispatchFault";
    pub const UNKNOWN_METHOD: &str = "UnknownMethod";
    pub const TIMEOUT: &str = "Timeout";
    pub const CANCELLED: &str = "Cancelled";
    pub const OVERLOADED: &str = "Overloaded";
    pub const BAD_REQUEST: &str = "BadRequest";
    pub const PANIC: &str = "Panic";
}

/// Structured error data serialized back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDescriptor {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FaultDescriptor {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for FaultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Coarse classification of a fault, independent of its free-form `kind`.
///
/// The class decides the transport status code; the descriptor is what the
/// caller reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// A filter rejected the call.
    Authorization,
    /// An interceptor handler failed.
    Handler,
    /// The business method returned an error.
    Dispatch,
    /// The exception stage itself failed, or the call task died.
    Internal,
    /// The transport cancelled the call.
    Cancelled,
    /// No business method is registered under the requested identifier.
    UnknownMethod,
    /// The call exceeded its deadline.
    Timeout,
    /// The node refused the call because too many are in flight.
    Overloaded,
    /// The inbound request could not be decoded.
    BadRequest,
}

impl FaultClass {
    /// HTTP status code used when this class is serialized to the transport.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Authorization => 403,
            Self::Dispatch => 422,
            Self::UnknownMethod => 404,
            Self::Timeout => 504,
            Self::Overloaded => 503,
            Self::BadRequest => 400,
            // Non-standard "client closed request"; rarely observed since the
            // client is already gone.
            Self::Cancelled => 499,
            Self::Handler | Self::Internal => 500,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Handler => "handler",
            Self::Dispatch => "dispatch",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::UnknownMethod => "unknown_method",
            Self::Timeout => "timeout",
            Self::Overloaded => "overloaded",
            Self::BadRequest => "bad_request",
        }
    }
}

/// A classified fault travelling through the exception stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub class: FaultClass,
    pub descriptor: FaultDescriptor,
}

impl Fault {
    #[must_use]
    pub fn new(class: FaultClass, descriptor: FaultDescriptor) -> Self {
        Self { class, descriptor }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.class.as_str(), self.descriptor)
    }
}
