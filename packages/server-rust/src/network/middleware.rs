//! HTTP middleware stack for the node.
//!
//! Layers are listed outermost first: the first layer sees the request
//! first and the response last. CORS is optional and applied separately
//! through [`build_cors_layer`] when `use_cors` is set.

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NodeConfig;

/// Header carrying the per-request id assigned at the edge.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
            Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
        >,
    >,
>;

/// Builds the transport-level layers:
///
/// 1. `SetRequestId`: UUID v4 `x-request-id` on every request
/// 2. `Trace`: request/response spans
/// 3. `Timeout`: `request_timeout`; an expired request drops its call,
///    which then completes as `Cancelled` through the exception stage
/// 4. `PropagateRequestId`: echoes `x-request-id` on the response
#[must_use]
pub fn build_http_layers(config: &NodeConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Builds the CORS layer. `"*"` allows any origin; unparsable origins are
/// skipped (`NodeConfig::validate` reports them up front).
#[must_use]
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn http_layers_build_with_defaults_and_custom_timeout() {
        let _layers = build_http_layers(&NodeConfig::default());
        let _layers = build_http_layers(&NodeConfig {
            request_timeout: Duration::from_secs(5),
            ..NodeConfig::default()
        });
    }

    #[test]
    fn cors_layer_accepts_wildcard_and_explicit_origins() {
        let _any = build_cors_layer(&["*".to_string()]);
        let _list = build_cors_layer(&[
            "http://localhost:3000".to_string(),
            "https://mesh.example".to_string(),
        ]);
    }
}
