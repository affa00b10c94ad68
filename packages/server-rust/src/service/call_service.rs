//! Tower entry point for inbound calls.
//!
//! Turns an [`InboundCall`] into a [`CallContext`] and runs it through the
//! [`InterceptorPipeline`] on its own task. The caller's future holds a drop
//! guard on the call's cancellation token: if the transport drops the
//! request (client disconnect, HTTP timeout) the token fires and the pipeline
//! still runs the exception stage with a `Cancelled` fault.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use meshnode_core::metadata::keys;
use meshnode_core::CallContext;
use tokio_util::sync::CancellationToken;
use tower::Service;

use super::call::{CallFault, CallReply, InboundCall};
use super::config::ServiceConfig;
use super::pipeline::InterceptorPipeline;

/// Clonable handle that executes inbound calls.
#[derive(Clone)]
pub struct CallService {
    pipeline: Arc<InterceptorPipeline>,
    config: Arc<ServiceConfig>,
    call_ids: Arc<AtomicU64>,
}

impl CallService {
    #[must_use]
    pub fn new(pipeline: Arc<InterceptorPipeline>, config: Arc<ServiceConfig>) -> Self {
        Self {
            pipeline,
            config,
            call_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.pipeline
    }

    fn next_call_id(&self) -> u64 {
        self.call_ids.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(&self, mut call: InboundCall) -> (CallContext, Option<String>) {
        if !self.config.trust_upstream_auth_ignore
            && call.metadata.remove(keys::AUTH_IGNORE).is_some()
        {
            tracing::debug!(method = %call.method, "dropped inbound AuthIgnore marker");
        }
        let timeout_ms = call
            .timeout_ms
            .unwrap_or(self.config.default_call_timeout_ms);
        let mut ctx = CallContext::new(self.next_call_id(), call.method, call.payload, timeout_ms)
            .with_metadata(call.metadata);
        ctx.trace_id = call.trace_id;
        (ctx, call.decode_error)
    }

    /// Executes one call to completion.
    pub async fn run(&self, call: InboundCall) -> CallReply {
        let (ctx, decode_error) = self.make_ctx(call);
        let call_id = ctx.call_id;

        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        let pipeline = Arc::clone(&self.pipeline);

        let task = tokio::spawn(async move {
            let done = match decode_error {
                Some(message) => {
                    pipeline
                        .execute_faulted(ctx, CallFault::BadRequest { message })
                        .await
                }
                None => pipeline.execute(ctx, token).await,
            };
            done.into_outcome()
        });

        let joined = task.await;
        // The call finished on its own; nothing left to cancel.
        let _token = guard.disarm();

        match joined {
            Ok(outcome) => CallReply::from_outcome(outcome),
            Err(err) => {
                tracing::error!(call_id, error = %err, "call task died before producing an outcome");
                CallReply::Fault(
                    CallFault::InternalPipelineFault {
                        message: "call task terminated abnormally".to_string(),
                    }
                    .into_fault(),
                )
            }
        }
    }
}

impl Service<InboundCall> for CallService {
    type Response = CallReply;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<CallReply, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: InboundCall) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.run(call).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
