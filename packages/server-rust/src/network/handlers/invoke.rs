//! `POST /{*method}`: runs one call through the pipeline.
//!
//! The body is decoded as JSON unless `content-type` is MessagePack; the
//! reply uses the same encoding. Faults are returned with the status of
//! their class and the fault descriptor as the body.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use meshnode_core::fault::kinds;
use meshnode_core::{FaultDescriptor, PayloadCodec, Value};
use tower::ServiceExt;

use super::AppState;
use crate::service::{CallReply, InboundCall};

/// Header carrying the caller's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Header overriding the call deadline, in milliseconds.
pub const CALL_TIMEOUT_HEADER: &str = "x-call-timeout-ms";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Builds the [`InboundCall`] for a request. Undecodable bodies are carried
/// as a decode error so the call still reaches the exception stage.
fn inbound_call(
    state: &AppState,
    method: String,
    headers: &HeaderMap,
    codec: PayloadCodec,
    body: &[u8],
) -> InboundCall {
    let (payload, decode_error) = match codec.decode(body) {
        Ok(value) => (value, None),
        Err(err) => (Value::Null, Some(err.to_string())),
    };

    let mut call = InboundCall::new(method, payload)
        .with_metadata(state.config.tracing_headers.extract(headers));
    call.decode_error = decode_error;
    call.trace_id = header_str(headers, TRACE_ID_HEADER).map(ToString::to_string);
    call.timeout_ms = header_str(headers, CALL_TIMEOUT_HEADER).and_then(|v| v.trim().parse().ok());
    call
}

fn encode_response<T: serde::Serialize + ?Sized>(
    status: StatusCode,
    codec: PayloadCodec,
    body: &T,
) -> Response {
    match codec.encode(body) {
        Ok(bytes) => (
            status,
            [(CONTENT_TYPE, HeaderValue::from_static(codec.content_type()))],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode call reply");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode reply").into_response()
        }
    }
}

/// Invokes `method` with the request body as payload.
///
/// Returns 503 without running the pipeline while the node is starting or
/// draining.
pub async fn invoke_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let codec = PayloadCodec::from_content_type(header_str(&headers, CONTENT_TYPE.as_str()));

    let Some(_in_flight) = state.shutdown.try_admit() else {
        let refusal = FaultDescriptor::new(kinds::OVERLOADED, "node is not accepting calls");
        return encode_response(StatusCode::SERVICE_UNAVAILABLE, codec, &refusal);
    };

    let call = inbound_call(&state, method, &headers, codec, &body);
    let reply = match state.calls.clone().oneshot(call).await {
        Ok(reply) => reply,
        Err(never) => match never {},
    };

    let status =
        StatusCode::from_u16(reply.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match &reply {
        CallReply::Success(value) => encode_response(status, codec, value),
        CallReply::Fault(fault) => encode_response(status, codec, &fault.descriptor),
    }
}
