//! Call execution framework.
//!
//! Every inbound call flows through the same pipeline:
//!
//! 1. **Admission** (`pipeline`): non-blocking concurrency limit
//! 2. **Context** (`interceptor`): context handlers prepare the `CallContext`
//! 3. **Filters** (`filter`): ordered authentication/authorization verdicts
//! 4. **BeforeSend / Dispatch / AfterInvoke** (`interceptor`, `dispatcher`)
//! 5. **Exception** (`interceptor`): every fault is normalized exactly once
//!
//! Registrations are collected in a `PipelineRegistry` (`registration`) and
//! sealed before the node serves. `CallService` (`call_service`) is the tower
//! entry point; `middleware` wraps it with metrics.

pub mod builtin;
pub mod call;
pub mod call_service;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod filter;
pub mod interceptor;
pub mod middleware;
pub mod pipeline;
pub mod registration;

// Re-export key types for convenient access.
pub use call::{CallFault, CallReply, InboundCall, Stage};
pub use call_service::CallService;
pub use config::ServiceConfig;
pub use dispatcher::{handler_fn, Dispatcher, MethodHandler, MethodResult};
pub use filter::{Filter, FilterChain, FilterDescriptor, FilterScope, FilterVerdict};
pub use interceptor::{
    AfterInvokeHandler, BeforeSendHandler, ContextHandler, ExceptionHandler, HandlerError,
    InterceptorChain,
};
pub use middleware::{build_call_stack, CallStack, MetricsLayer};
pub use pipeline::InterceptorPipeline;
pub use registration::{PipelineRegistration, PipelineRegistry, RegistrationError, Subscription};
