//! Node server with deferred startup.
//!
//! `new()` takes the registry and method table, `start()` seals the pipeline
//! registration and binds the listener, and `serve()` accepts calls until
//! shutdown. Business code registers filters and handlers between `new()`
//! and `start()`; after sealing every registration is rejected.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NodeConfig;
use super::handlers::{
    health_handler, invoke_handler, liveness_handler, readiness_handler, subscribe_handler,
    AppState,
};
use super::middleware::{build_cors_layer, build_http_layers};
use super::shutdown::ShutdownController;
use crate::service::{
    build_call_stack, CallService, Dispatcher, InterceptorPipeline, PipelineRegistry,
};

/// Time allowed for in-flight calls to finish after shutdown begins.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles the node router:
///
/// - `GET /health`, `GET /health/live`, `GET /health/ready`
/// - `GET /dapr/subscribe`
/// - `POST /{*method}`
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/dapr/subscribe", get(subscribe_handler))
        .route("/{*method}", post(invoke_handler))
        .layer(build_http_layers(&config));

    let router = if config.use_cors {
        router.layer(build_cors_layer(&config.cors_origins))
    } else {
        router
    };
    router.with_state(state)
}

/// A mesh node: pipeline registration, method table and HTTP front end.
pub struct NodeServer {
    config: NodeConfig,
    registry: Arc<PipelineRegistry>,
    dispatcher: Option<Dispatcher>,
    state: Option<AppState>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NodeServer {
    #[must_use]
    pub fn new(config: NodeConfig, registry: Arc<PipelineRegistry>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            registry,
            dispatcher: Some(dispatcher),
            state: None,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<PipelineRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Validates the configuration, seals the registry and builds the
    /// shared call stack.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, or with `RegistrationError::Misuse`
    /// when the registry was already sealed.
    pub fn seal(&mut self) -> anyhow::Result<AppState> {
        self.config.validate()?;
        let registration = self.registry.seal()?;
        let dispatcher = self
            .dispatcher
            .take()
            .context("node was already sealed")?;

        info!(
            methods = ?dispatcher.method_names(),
            max_concurrent_calls = self.config.service.max_concurrent_calls,
            "sealing node"
        );

        let pipeline = InterceptorPipeline::new(
            Arc::clone(&registration),
            Arc::new(dispatcher),
            self.config.service.max_concurrent_calls,
        );
        let calls = build_call_stack(CallService::new(
            Arc::new(pipeline),
            Arc::new(self.config.service.clone()),
        ));

        let state = AppState {
            calls,
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            registration,
            start_time: Instant::now(),
        };
        self.state = Some(state.clone());
        Ok(state)
    }

    /// Router over the sealed state.
    ///
    /// # Errors
    ///
    /// Fails if the node has not been sealed.
    pub fn router(&self) -> anyhow::Result<Router> {
        let state = self
            .state
            .clone()
            .context("node must be sealed before building the router")?;
        Ok(build_router(state))
    }

    /// Seals the registry (if not yet sealed) and binds the listener.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Fails if sealing fails or the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        if self.state.is_none() {
            self.seal()?;
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "node listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves calls until `shutdown` completes or the shutdown controller is
    /// triggered, then drains in-flight calls for up to [`DRAIN_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Fails if `start()` was not called first or the server hits a fatal
    /// I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let state = self
            .state
            .context("start() must be called before serve()")?;
        let router = build_router(state);

        let controller = self.shutdown;
        let token = controller.shutdown_token();
        let signal_ctrl = Arc::clone(&controller);
        let signal = async move {
            tokio::select! {
                () = shutdown => {}
                () = token.cancelled() => {}
            }
            info!("shutdown signalled; refusing new calls");
            signal_ctrl.trigger_shutdown();
        };

        controller.set_ready();
        info!("node ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await?;

        if controller.wait_for_drain(DRAIN_TIMEOUT).await {
            info!("all calls drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with calls still in flight"
            );
        }
        Ok(())
    }
}
