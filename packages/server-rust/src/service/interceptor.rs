//! Interceptor roles and the ordered per-role handler lists.
//!
//! Each role is a small async trait; a registration holds one ordered list
//! per role. Within a role handlers run in registration order and the first
//! failure aborts the rest of the stage.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshnode_core::{CallContext, Fault, Value};

use super::call::{CallFault, Stage};

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Error raised by an interceptor handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub detail: Option<String>,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn into_call_fault(self, stage: Stage, handler: &str) -> CallFault {
        CallFault::PipelineHandlerFault {
            stage,
            handler: handler.to_string(),
            message: self.message,
            detail: self.detail,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

// ---------------------------------------------------------------------------
// Handler roles
// ---------------------------------------------------------------------------

/// Builds and normalizes the call context. Runs before the filter chain.
#[async_trait]
pub trait ContextHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_context(&self, ctx: &mut CallContext) -> Result<(), HandlerError>;
}

/// Transforms the request after the filter chain allowed it.
#[async_trait]
pub trait BeforeSendHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn before_send(&self, ctx: &mut CallContext) -> Result<(), HandlerError>;
}

/// Post-processes a successful result. Returns the (possibly replaced) value.
#[async_trait]
pub trait AfterInvokeHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn after_invoke(
        &self,
        ctx: &mut CallContext,
        result: Value,
    ) -> Result<Value, HandlerError>;
}

/// Classifies or translates a captured fault.
///
/// The returned fault replaces the one handed in; there is no way back to
/// normal dispatch from here.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_exception(&self, ctx: &CallContext, fault: Fault) -> Result<Fault, HandlerError>;
}

// ---------------------------------------------------------------------------
// InterceptorChain
// ---------------------------------------------------------------------------

/// One ordered handler list per role.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    pub(crate) context: Vec<Arc<dyn ContextHandler>>,
    pub(crate) before_send: Vec<Arc<dyn BeforeSendHandler>>,
    pub(crate) after_invoke: Vec<Arc<dyn AfterInvokeHandler>>,
    pub(crate) exception: Vec<Arc<dyn ExceptionHandler>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends whichever handlers are present, one per role.
    pub fn push(
        &mut self,
        context: Option<Arc<dyn ContextHandler>>,
        before_send: Option<Arc<dyn BeforeSendHandler>>,
        after_invoke: Option<Arc<dyn AfterInvokeHandler>>,
        exception: Option<Arc<dyn ExceptionHandler>>,
    ) {
        self.context.extend(context);
        self.before_send.extend(before_send);
        self.after_invoke.extend(after_invoke);
        self.exception.extend(exception);
    }

    /// Number of handlers registered for `stage`.
    #[must_use]
    pub fn len(&self, stage: Stage) -> usize {
        match stage {
            Stage::Context => self.context.len(),
            Stage::BeforeSend => self.before_send.len(),
            Stage::AfterInvoke => self.after_invoke.len(),
            Stage::Exception => self.exception.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.before_send.is_empty()
            && self.after_invoke.is_empty()
            && self.exception.is_empty()
    }

    pub(crate) async fn run_context(&self, ctx: &mut CallContext) -> Result<(), CallFault> {
        for handler in &self.context {
            handler
                .on_context(ctx)
                .await
                .map_err(|e| e.into_call_fault(Stage::Context, handler.name()))?;
        }
        Ok(())
    }

    pub(crate) async fn run_before_send(&self, ctx: &mut CallContext) -> Result<(), CallFault> {
        for handler in &self.before_send {
            handler
                .before_send(ctx)
                .await
                .map_err(|e| e.into_call_fault(Stage::BeforeSend, handler.name()))?;
        }
        Ok(())
    }

    pub(crate) async fn run_after_invoke(
        &self,
        ctx: &mut CallContext,
        mut result: Value,
    ) -> Result<Value, CallFault> {
        for handler in &self.after_invoke {
            result = handler
                .after_invoke(ctx, result)
                .await
                .map_err(|e| e.into_call_fault(Stage::AfterInvoke, handler.name()))?;
        }
        Ok(result)
    }

    /// Runs the exception stage. A failing exception handler ends the stage
    /// with an internal pipeline fault; the stage never re-enters itself.
    pub(crate) async fn run_exception(&self, ctx: &CallContext, mut fault: Fault) -> Fault {
        for handler in &self.exception {
            match handler.on_exception(ctx, fault).await {
                Ok(next) => fault = next,
                Err(err) => {
                    tracing::error!(
                        call_id = ctx.call_id,
                        handler = handler.name(),
                        error = %err,
                        "exception handler failed"
                    );
                    return CallFault::InternalPipelineFault {
                        message: format!("exception handler `{}` failed: {err}", handler.name()),
                    }
                    .into_fault();
                }
            }
        }
        fault
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("context", &self.context.len())
            .field("before_send", &self.before_send.len())
            .field("after_invoke", &self.after_invoke.len())
            .field("exception", &self.exception.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
