//! Method dispatch: resolves `ctx.method` to a registered business method and
//! invokes it once, racing the call's deadline and cancellation token.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use meshnode_core::fault::kinds;
use meshnode_core::{CallContext, FaultDescriptor, Value};
use tokio_util::sync::CancellationToken;

use super::call::CallFault;
use super::registration::RegistrationError;

/// Result of a business method: a payload or a business fault. A fault with
/// an empty `kind` is reported as `DispatchFault`.
pub type MethodResult = Result<Value, FaultDescriptor>;

// ---------------------------------------------------------------------------
// MethodHandler
// ---------------------------------------------------------------------------

/// A business method callable through the pipeline.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn invoke(&self, ctx: &CallContext) -> MethodResult;
}

/// Adapter turning an async closure into a [`MethodHandler`].
///
/// The closure receives its own copy of the context.
pub struct HandlerFn<F>(F);

/// Wraps `f` as a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> MethodHandler for HandlerFn<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult> + Send,
{
    async fn invoke(&self, ctx: &CallContext) -> MethodResult {
        (self.0)(ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Method table populated at startup, then shared read-only.
///
/// The table is filled through `&mut self` before the dispatcher is moved
/// into the node, so later registration cannot happen.
#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a business method under `name`.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::DuplicateMethod` if `name` is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl MethodHandler + 'static,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(RegistrationError::DuplicateMethod(name));
        }
        self.methods.insert(name, Arc::new(handler));
        Ok(())
    }

    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.get(method).cloned()
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Invokes the target method at most once.
    ///
    /// A `call_timeout_ms` of 0 disables the deadline. A panicking method is
    /// captured as a dispatch fault of kind `Panic`.
    ///
    /// # Errors
    ///
    /// Returns the captured `CallFault`: `UnknownMethod`, `Timeout`,
    /// `Cancelled`, or `Dispatch` for business faults and panics.
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        cancel: &CancellationToken,
    ) -> Result<Value, CallFault> {
        let handler = self
            .methods
            .get(&ctx.method)
            .ok_or_else(|| CallFault::UnknownMethod {
                method: ctx.method.clone(),
            })?;

        let timeout_ms = ctx.call_timeout_ms;
        let invocation = AssertUnwindSafe(handler.invoke(ctx)).catch_unwind();
        let bounded = async move {
            if timeout_ms == 0 {
                Ok(invocation.await)
            } else {
                tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallFault::Cancelled),
            result = bounded => match result {
                Err(_elapsed) => Err(CallFault::Timeout { timeout_ms }),
                Ok(Err(panic)) => Err(CallFault::Dispatch(FaultDescriptor::new(
                    kinds::PANIC,
                    panic_message(panic.as_ref()),
                ))),
                Ok(Ok(Err(mut business))) => {
                    if business.kind.is_empty() {
                        business.kind = kinds::DISPATCH_FAULT.to_string();
                    }
                    Err(CallFault::Dispatch(business))
                }
                Ok(Ok(Ok(value))) => Ok(value),
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "business method panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
