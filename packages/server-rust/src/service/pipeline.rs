//! The interception pipeline: drives one call through the context stage, the
//! filter chain, the before-send stage, dispatch, and then exactly one of the
//! after-invoke stage or the exception stage.
//!
//! ```text
//! ContextBuilt -> BeforeSendRun -> Dispatched -> AfterInvokeRun -> Completed
//!       \              \               \
//!        +--------------+---------------+--> ExceptionRun -> Faulted
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use meshnode_core::{CallContext, CallOutcome, CallState, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::call::CallFault;
use super::dispatcher::Dispatcher;
use super::filter::FilterVerdict;
use super::registration::PipelineRegistration;

/// Executes calls against a sealed registration and a dispatcher.
///
/// Cheap to share: every field is reference-counted and read-only, so any
/// number of calls may run concurrently.
pub struct InterceptorPipeline {
    registration: Arc<PipelineRegistration>,
    dispatcher: Arc<Dispatcher>,
    admission: Arc<Semaphore>,
}

impl InterceptorPipeline {
    /// `max_concurrent_calls` bounds in-flight calls; excess calls fault with
    /// `Overloaded` instead of queueing.
    #[must_use]
    pub fn new(
        registration: Arc<PipelineRegistration>,
        dispatcher: Arc<Dispatcher>,
        max_concurrent_calls: u32,
    ) -> Self {
        Self {
            registration,
            dispatcher,
            admission: Arc::new(Semaphore::new(max_concurrent_calls as usize)),
        }
    }

    #[must_use]
    pub fn registration(&self) -> &Arc<PipelineRegistration> {
        &self.registration
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Runs the full pipeline for one call and returns the context with its
    /// outcome populated.
    pub async fn execute(&self, mut ctx: CallContext, cancel: CancellationToken) -> CallContext {
        let span = info_span!(
            "call",
            call_id = ctx.call_id,
            method = %ctx.method,
            trace_id = tracing::field::Empty,
            state = tracing::field::Empty,
        );

        async move {
            let Ok(_permit) = self.admission.try_acquire() else {
                self.fail(&mut ctx, CallFault::Overloaded).await;
                return ctx;
            };

            let forward = AssertUnwindSafe(self.run_forward(&mut ctx, &cancel))
                .catch_unwind()
                .await;

            match forward {
                Ok(Ok(value)) => {
                    ctx.advance(CallState::Completed);
                    ctx.set_outcome(CallOutcome::Success(value));
                }
                Ok(Err(fault)) => self.fail(&mut ctx, fault).await,
                Err(_panic) => {
                    let fault = CallFault::InternalPipelineFault {
                        message: format!("pipeline stage panicked in state {}", ctx.state().as_str()),
                    };
                    self.fail(&mut ctx, fault).await;
                }
            }

            tracing::Span::current().record("state", ctx.state().as_str());
            ctx
        }
        .instrument(span)
        .await
    }

    /// Sends a call that failed before it could enter the pipeline (e.g. an
    /// undecodable body) straight to the exception stage.
    pub async fn execute_faulted(&self, mut ctx: CallContext, fault: CallFault) -> CallContext {
        let span = info_span!("call", call_id = ctx.call_id, method = %ctx.method);
        async move {
            self.fail(&mut ctx, fault).await;
            ctx
        }
        .instrument(span)
        .await
    }

    async fn run_forward(
        &self,
        ctx: &mut CallContext,
        cancel: &CancellationToken,
    ) -> Result<Value, CallFault> {
        let interceptors = self.registration.interceptors();

        interceptors.run_context(ctx).await?;
        if let Some(trace_id) = ctx.trace_id.as_deref() {
            tracing::Span::current().record("trace_id", trace_id);
        }
        ensure_live(cancel)?;

        if let FilterVerdict::Reject(reason) = self.registration.filters().evaluate(ctx).await {
            return Err(CallFault::AuthorizationRejected { reason });
        }

        interceptors.run_before_send(ctx).await?;
        ctx.advance(CallState::BeforeSendRun);
        ensure_live(cancel)?;

        let value = self.dispatcher.dispatch(ctx, cancel).await?;
        ctx.advance(CallState::Dispatched);
        // Last point where a cancelled call can still take the exception path.
        ensure_live(cancel)?;

        let value = interceptors.run_after_invoke(ctx, value).await?;
        ctx.advance(CallState::AfterInvokeRun);
        Ok(value)
    }

    async fn fail(&self, ctx: &mut CallContext, fault: CallFault) {
        tracing::debug!(
            class = fault.class().as_str(),
            error = %fault,
            "call faulted, running exception stage"
        );
        ctx.advance(CallState::ExceptionRun);
        let fault = self
            .registration
            .interceptors()
            .run_exception(ctx, fault.into_fault())
            .await;
        ctx.advance(CallState::Faulted);
        ctx.set_outcome(CallOutcome::Fault(fault));
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), CallFault> {
    if cancel.is_cancelled() {
        Err(CallFault::Cancelled)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use meshnode_core::{Fault, FaultClass, FaultDescriptor};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::service::dispatcher::{handler_fn, MethodResult};
    use crate::service::filter::{Filter, FilterDescriptor};
    use crate::service::interceptor::{
        AfterInvokeHandler, BeforeSendHandler, ContextHandler, ExceptionHandler, HandlerError,
    };
    use crate::service::registration::PipelineRegistry;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Implements every role and records which stages ran.
    struct Recorder {
        log: Log,
        fail_after_invoke: bool,
    }

    impl Recorder {
        fn new(log: &Log) -> Arc<Self> {
            Arc::new(Self {
                log: log.clone(),
                fail_after_invoke: false,
            })
        }
    }

    #[async_trait]
    impl ContextHandler for Recorder {
        async fn on_context(&self, _ctx: &mut CallContext) -> Result<(), HandlerError> {
            self.log.lock().push("context".into());
            Ok(())
        }
    }

    #[async_trait]
    impl BeforeSendHandler for Recorder {
        async fn before_send(&self, _ctx: &mut CallContext) -> Result<(), HandlerError> {
            self.log.lock().push("before_send".into());
            Ok(())
        }
    }

    #[async_trait]
    impl AfterInvokeHandler for Recorder {
        async fn after_invoke(
            &self,
            _ctx: &mut CallContext,
            result: Value,
        ) -> Result<Value, HandlerError> {
            self.log.lock().push("after_invoke".into());
            if self.fail_after_invoke {
                return Err(HandlerError::new("audit sink unavailable"));
            }
            Ok(result)
        }
    }

    #[async_trait]
    impl ExceptionHandler for Recorder {
        async fn on_exception(&self, _ctx: &CallContext, fault: Fault) -> Result<Fault, HandlerError> {
            self.log.lock().push(format!("exception:{}", fault.kind()));
            Ok(fault)
        }
    }

    fn register_recorder(registry: &PipelineRegistry, recorder: Arc<Recorder>) {
        registry
            .register_pipeline_handler(
                Some(recorder.clone()),
                Some(recorder.clone()),
                Some(recorder.clone()),
                Some(recorder),
            )
            .unwrap();
    }

    struct Reject(&'static str);

    #[async_trait]
    impl Filter for Reject {
        async fn evaluate(&self, _ctx: &mut CallContext) -> FilterVerdict {
            FilterVerdict::reject(self.0)
        }
    }

    struct CountingFilter(Log, &'static str, FilterVerdict);

    #[async_trait]
    impl Filter for CountingFilter {
        async fn evaluate(&self, _ctx: &mut CallContext) -> FilterVerdict {
            self.0.lock().push(self.1.to_string());
            self.2.clone()
        }
    }

    fn ping_dispatcher(invocations: &Log) -> Dispatcher {
        let invocations = invocations.clone();
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "Ping",
                handler_fn(move |ctx: CallContext| {
                    let invocations = invocations.clone();
                    async move {
                        invocations.lock().push(ctx.method.clone());
                        Ok(json!({"pong": ctx.payload}))
                    }
                }),
            )
            .unwrap();
        dispatcher
    }

    fn pipeline(registry: &PipelineRegistry, dispatcher: Dispatcher) -> InterceptorPipeline {
        InterceptorPipeline::new(registry.seal().unwrap(), Arc::new(dispatcher), 64)
    }

    fn ctx(method: &str) -> CallContext {
        CallContext::new(7, method, json!({}), 1000)
    }

    async fn run(p: &InterceptorPipeline, method: &str) -> CallContext {
        p.execute(ctx(method), CancellationToken::new()).await
    }

    #[tokio::test]
    async fn bare_pipeline_returns_business_result_unchanged() {
        let invocations = Log::default();
        let p = pipeline(&PipelineRegistry::new(), ping_dispatcher(&invocations));

        let done = run(&p, "Ping").await;
        assert_eq!(done.state(), CallState::Completed);
        assert_eq!(
            done.into_outcome(),
            CallOutcome::Success(json!({"pong": {}}))
        );
        assert_eq!(*invocations.lock(), vec!["Ping"]);
    }

    #[tokio::test]
    async fn global_reject_never_reaches_dispatcher() {
        let invocations = Log::default();
        let registry = PipelineRegistry::new();
        registry
            .register_filter(FilterDescriptor::global("deny", 0, Reject("unauthenticated")))
            .unwrap();
        let p = pipeline(&registry, ping_dispatcher(&invocations));

        let done = run(&p, "Ping").await;
        assert_eq!(done.state(), CallState::Faulted);
        let CallOutcome::Fault(fault) = done.into_outcome() else {
            panic!("expected fault");
        };
        assert_eq!(fault.class, FaultClass::Authorization);
        assert_eq!(fault.kind(), "AuthorizationRejected");
        assert_eq!(fault.descriptor.message, "unauthenticated");
        assert!(invocations.lock().is_empty());
    }

    #[tokio::test]
    async fn context_header_flows_through_before_send_into_dispatch() {
        struct Inject;
        #[async_trait]
        impl ContextHandler for Inject {
            async fn on_context(&self, ctx: &mut CallContext) -> Result<(), HandlerError> {
                ctx.metadata.insert("Authentication", "X");
                Ok(())
            }
        }

        struct Verify;
        #[async_trait]
        impl BeforeSendHandler for Verify {
            async fn before_send(&self, ctx: &mut CallContext) -> Result<(), HandlerError> {
                let current = ctx
                    .metadata
                    .get("Authentication")
                    .ok_or_else(|| HandlerError::new("missing header"))?
                    .to_string();
                ctx.metadata.insert("Authentication", format!("{current}-verified"));
                Ok(())
            }
        }

        let registry = PipelineRegistry::new();
        registry
            .register_pipeline_handler(Some(Arc::new(Inject)), Some(Arc::new(Verify)), None, None)
            .unwrap();
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "Echo",
                handler_fn(|ctx: CallContext| async move {
                    Ok(serde_json::to_value(&ctx.metadata).unwrap_or_default())
                }),
            )
            .unwrap();
        let p = pipeline(&registry, dispatcher);

        let done = run(&p, "Echo").await;
        assert_eq!(
            done.into_outcome(),
            CallOutcome::Success(json!({"Authentication": "X-verified"}))
        );
    }

    #[tokio::test]
    async fn business_fault_runs_exception_stage_only() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(
                "Find",
                handler_fn(|_ctx| async { Err(FaultDescriptor::new("NotFound", "no such account")) }),
            )
            .unwrap();
        let p = pipeline(&registry, dispatcher);

        let done = run(&p, "Find").await;
        assert_eq!(
            *log.lock(),
            vec!["context", "before_send", "exception:NotFound"]
        );
        let CallOutcome::Fault(fault) = done.into_outcome() else {
            panic!("expected fault");
        };
        assert_eq!(fault.kind(), "NotFound");
        assert_eq!(fault.class, FaultClass::Dispatch);
    }

    #[tokio::test]
    async fn scoped_priority_one_reject_skips_priority_two() {
        let seen = Log::default();
        let registry = PipelineRegistry::new();
        registry
            .register_filter(FilterDescriptor::for_method(
                "p2",
                "Transfer",
                2,
                CountingFilter(seen.clone(), "p2", FilterVerdict::Allow),
            ))
            .unwrap();
        registry
            .register_filter(FilterDescriptor::for_method(
                "p1",
                "Transfer",
                1,
                CountingFilter(seen.clone(), "p1", FilterVerdict::reject("over limit")),
            ))
            .unwrap();
        let p = pipeline(&registry, Dispatcher::new());

        let done = run(&p, "Transfer").await;
        assert_eq!(*seen.lock(), vec!["p1"]);
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Authorization
        ));
    }

    #[tokio::test]
    async fn exactly_one_terminal_path_per_call() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));
        registry
            .register_filter(FilterDescriptor::for_method("deny", "Denied", 0, Reject("no")))
            .unwrap();
        let p = pipeline(&registry, ping_dispatcher(&Log::default()));

        for method in ["Ping", "Denied", "Unknown"] {
            log.lock().clear();
            let done = run(&p, method).await;
            let entries = log.lock().clone();
            let after = entries.iter().filter(|e| *e == "after_invoke").count();
            let exception = entries.iter().filter(|e| e.starts_with("exception:")).count();
            assert_eq!(after + exception, 1, "{method}: {entries:?}");
            assert!(done.state().is_terminal());
            assert!(!done.outcome().is_pending());
        }
    }

    #[tokio::test]
    async fn reject_does_not_run_before_send() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));
        registry
            .register_filter(FilterDescriptor::global("deny", 0, Reject("unauthenticated")))
            .unwrap();
        let p = pipeline(&registry, ping_dispatcher(&Log::default()));

        run(&p, "Ping").await;
        assert_eq!(
            *log.lock(),
            vec!["context", "exception:AuthorizationRejected"]
        );
    }

    #[tokio::test]
    async fn failing_after_invoke_diverts_to_exception_path() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(
            &registry,
            Arc::new(Recorder {
                log: log.clone(),
                fail_after_invoke: true,
            }),
        );
        let p = pipeline(&registry, ping_dispatcher(&Log::default()));

        let done = run(&p, "Ping").await;
        assert_eq!(done.state(), CallState::Faulted);
        assert_eq!(
            log.lock().last().map(String::as_str),
            Some("exception:PipelineHandlerFault")
        );
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Handler
        ));
    }

    #[tokio::test]
    async fn failing_exception_handler_yields_internal_fault() {
        struct Broken;
        #[async_trait]
        impl ExceptionHandler for Broken {
            async fn on_exception(&self, _ctx: &CallContext, _f: Fault) -> Result<Fault, HandlerError> {
                Err(HandlerError::new("classifier crashed"))
            }
        }

        let registry = PipelineRegistry::new();
        registry
            .register_pipeline_handler(None, None, None, Some(Arc::new(Broken)))
            .unwrap();
        let p = pipeline(&registry, Dispatcher::new());

        let done = run(&p, "Unknown").await;
        assert_eq!(done.state(), CallState::Faulted);
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Internal
        ));
    }

    #[tokio::test]
    async fn identical_calls_classify_identically() {
        let registry = PipelineRegistry::new();
        registry
            .register_filter(FilterDescriptor::for_method("deny", "Denied", 0, Reject("no")))
            .unwrap();
        let p = pipeline(&registry, ping_dispatcher(&Log::default()));

        for method in ["Ping", "Denied", "Unknown"] {
            let first = run(&p, method).await.into_outcome();
            let second = run(&p, method).await.into_outcome();
            assert_eq!(first, second, "{method}");
        }
    }

    #[tokio::test]
    async fn cancelled_before_dispatch_faults_as_cancelled() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));
        let invocations = Log::default();
        let p = pipeline(&registry, ping_dispatcher(&invocations));

        let token = CancellationToken::new();
        token.cancel();
        let done = p.execute(ctx("Ping"), token).await;

        assert!(invocations.lock().is_empty());
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Cancelled
        ));
        assert_eq!(log.lock().last().map(String::as_str), Some("exception:Cancelled"));
    }

    #[tokio::test]
    async fn excess_concurrent_calls_are_overloaded() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let mut dispatcher = Dispatcher::new();
        {
            let gate = gate.clone();
            let entered = entered.clone();
            dispatcher
                .register(
                    "Hold",
                    handler_fn(move |_ctx| {
                        let gate = gate.clone();
                        let entered = entered.clone();
                        async move {
                            entered.notify_one();
                            gate.notified().await;
                            MethodResult::Ok(Value::Null)
                        }
                    }),
                )
                .unwrap();
        }
        let registry = PipelineRegistry::new();
        let p = Arc::new(InterceptorPipeline::new(
            registry.seal().unwrap(),
            Arc::new(dispatcher),
            1,
        ));

        let first = {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.execute(ctx("Hold"), CancellationToken::new()).await })
        };
        entered.notified().await;

        let second = run(&p, "Hold").await;
        assert!(matches!(
            second.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Overloaded
        ));

        gate.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.state(), CallState::Completed);
    }

    #[tokio::test]
    async fn execute_faulted_runs_only_exception_stage() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));
        let p = pipeline(&registry, Dispatcher::new());

        let done = p
            .execute_faulted(
                ctx("Ping"),
                CallFault::BadRequest {
                    message: "invalid JSON".to_string(),
                },
            )
            .await;
        assert_eq!(*log.lock(), vec!["exception:BadRequest"]);
        assert_eq!(done.state(), CallState::Faulted);
    }

    #[tokio::test]
    async fn failing_before_send_stops_stage_and_skips_dispatch() {
        struct Refuse(Log);
        #[async_trait]
        impl BeforeSendHandler for Refuse {
            async fn before_send(&self, _ctx: &mut CallContext) -> Result<(), HandlerError> {
                self.0.lock().push("before_send:refuse".into());
                Err(HandlerError::new("quota exhausted"))
            }
        }

        let log = Log::default();
        let registry = PipelineRegistry::new();
        registry
            .register_pipeline_handler(None, Some(Arc::new(Refuse(log.clone()))), None, None)
            .unwrap();
        register_recorder(&registry, Recorder::new(&log));
        let invocations = Log::default();
        let p = pipeline(&registry, ping_dispatcher(&invocations));

        let done = run(&p, "Ping").await;
        assert_eq!(
            *log.lock(),
            vec!["context", "before_send:refuse", "exception:PipelineHandlerFault"]
        );
        assert!(invocations.lock().is_empty());
        assert_eq!(done.state(), CallState::Faulted);
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Handler
        ));
    }

    #[tokio::test]
    async fn cancel_during_dispatch_skips_after_invoke() {
        let log = Log::default();
        let registry = PipelineRegistry::new();
        register_recorder(&registry, Recorder::new(&log));

        let token = CancellationToken::new();
        let mut dispatcher = Dispatcher::new();
        {
            let token = token.clone();
            dispatcher
                .register(
                    "Abandon",
                    handler_fn(move |_ctx| {
                        let token = token.clone();
                        async move {
                            // The caller goes away just as the method finishes.
                            token.cancel();
                            MethodResult::Ok(json!("late"))
                        }
                    }),
                )
                .unwrap();
        }
        let p = pipeline(&registry, dispatcher);

        let done = p.execute(ctx("Abandon"), token).await;
        assert_eq!(done.state(), CallState::Faulted);
        assert_eq!(
            *log.lock(),
            vec!["context", "before_send", "exception:Cancelled"]
        );
        assert!(matches!(
            done.outcome(),
            CallOutcome::Fault(f) if f.class == FaultClass::Cancelled
        ));
    }
}
