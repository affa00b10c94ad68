//! Sample business methods served by the `meshnode` binary.
//!
//! - `Ping`: liveness check through the full pipeline, anonymous
//! - `Echo`: returns the payload along with the caller's identity

use async_trait::async_trait;
use meshnode_core::{CallContext, FaultDescriptor};
use serde_json::json;

use super::builtin::AuthIgnoreFilter;
use super::dispatcher::{Dispatcher, MethodHandler, MethodResult};
use super::registration::{PipelineRegistry, RegistrationError};

pub const PING: &str = "Ping";
pub const ECHO: &str = "Echo";

/// Answers with the node id.
#[derive(Debug, Clone)]
pub struct PingMethod {
    node_id: String,
}

impl PingMethod {
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl MethodHandler for PingMethod {
    async fn invoke(&self, _ctx: &CallContext) -> MethodResult {
        Ok(json!({ "pong": true, "node": self.node_id }))
    }
}

/// Returns the payload. A `null` payload is a business fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoMethod;

#[async_trait]
impl MethodHandler for EchoMethod {
    async fn invoke(&self, ctx: &CallContext) -> MethodResult {
        if ctx.payload.is_null() {
            return Err(FaultDescriptor::new("EmptyPayload", "nothing to echo"));
        }
        Ok(json!({
            "echo": ctx.payload,
            "principal": ctx.principal.as_ref().map(|p| p.id.as_str()),
        }))
    }
}

/// Registers `Ping` and `Echo`, marking `Ping` as anonymous.
///
/// # Errors
///
/// Returns `DuplicateMethod` if either name is taken, or `Misuse` if the
/// registry is already sealed.
pub fn register_sample_methods(
    node_id: &str,
    registry: &PipelineRegistry,
    dispatcher: &mut Dispatcher,
) -> Result<(), RegistrationError> {
    dispatcher.register(PING, PingMethod::new(node_id))?;
    dispatcher.register(ECHO, EchoMethod)?;
    registry.register_filter(AuthIgnoreFilter::for_method(PING))
}
