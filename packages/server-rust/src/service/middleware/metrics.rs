//! Metrics middleware for inbound calls.
//!
//! Records call duration and outcome on a `tracing` span and through the
//! `metrics` facade (`meshnode_calls_total`, `meshnode_call_duration_ms`).
//! Without an installed recorder the `metrics` calls are no-ops.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::call::{CallReply, InboundCall};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome counters.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<InboundCall> for MetricsService<S>
where
    S: Service<InboundCall, Response = CallReply, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = CallReply;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<CallReply, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: InboundCall) -> Self::Future {
        let method = call.method.clone();

        let span = info_span!(
            "inbound_call",
            method = %method,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;

                let outcome = match &result {
                    Ok(CallReply::Success(_)) => "ok",
                    Ok(CallReply::Fault(fault)) => fault.class.as_str(),
                    Err(never) => match *never {},
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "meshnode_calls_total",
                    "method" => method.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                #[allow(clippy::cast_precision_loss)]
                let duration_f64 = duration_ms as f64;
                metrics::histogram!("meshnode_call_duration_ms", "method" => method.clone())
                    .record(duration_f64);

                tracing::info!(
                    method = %method,
                    duration_ms,
                    outcome,
                    "call complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
