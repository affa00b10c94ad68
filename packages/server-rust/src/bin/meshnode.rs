//! `meshnode`: runs a mesh node serving the sample `Ping` and `Echo` methods.
//!
//! Every option can be given as a flag or as a `MESHNODE_*` environment
//! variable.
//!
//! ```bash
//! MESHNODE_PORT=3500 MESHNODE_JWT_SECRET=s3cret meshnode --log-json
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use meshnode_server::network::{NodeConfig, NodeServer, TracingHeaders};
use meshnode_server::service::builtin::{register_default_interceptors, AuthenticationFilter};
use meshnode_server::service::domain::register_sample_methods;
use meshnode_server::service::{Dispatcher, PipelineRegistry, ServiceConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meshnode", version, about = "Service-mesh node with an interception pipeline")]
struct Args {
    /// Bind address.
    #[arg(long, env = "MESHNODE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port the sidecar calls into.
    #[arg(long, env = "MESHNODE_PORT")]
    port: u16,

    #[arg(long, env = "MESHNODE_PUBSUB_COMPONENT", default_value = "pubsub")]
    pubsub_component_name: String,

    #[arg(long, env = "MESHNODE_STATE_STORE_COMPONENT", default_value = "statestore")]
    state_store_component_name: String,

    /// Comma-separated headers copied into call metadata.
    #[arg(long, env = "MESHNODE_TRACING_HEADERS", default_value = TracingHeaders::DEFAULT)]
    tracing_headers: TracingHeaders,

    #[arg(long, env = "MESHNODE_USE_CORS", default_value_t = true, action = ArgAction::Set)]
    use_cors: bool,

    #[arg(long, env = "MESHNODE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// HTTP request deadline in seconds.
    #[arg(long, env = "MESHNODE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Dispatch deadline in milliseconds; 0 disables it.
    #[arg(long, env = "MESHNODE_CALL_TIMEOUT_MS", default_value_t = 15_000)]
    call_timeout_ms: u64,

    #[arg(long, env = "MESHNODE_MAX_CONCURRENT_CALLS", default_value_t = 1000)]
    max_concurrent_calls: u32,

    /// Send node-internal fault detail to callers.
    #[arg(long, env = "MESHNODE_EXPOSE_FAULT_DETAIL")]
    expose_fault_detail: bool,

    /// Honour an `AuthIgnore` header propagated by an upstream node. Only
    /// enable behind a sidecar that strips it from external traffic.
    #[arg(long, env = "MESHNODE_TRUST_UPSTREAM_AUTH_IGNORE")]
    trust_upstream_auth_ignore: bool,

    /// Node identifier; a random UUID when omitted.
    #[arg(long, env = "MESHNODE_NODE_ID")]
    node_id: Option<String>,

    /// HS256 secret for bearer tokens. Without it calls are not authenticated.
    #[arg(long, env = "MESHNODE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "MESHNODE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MESHNODE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            host: self.host.clone(),
            port: self.port,
            pubsub_component_name: self.pubsub_component_name.clone(),
            state_store_component_name: self.state_store_component_name.clone(),
            tracing_headers: self.tracing_headers.clone(),
            use_cors: self.use_cors,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            service: ServiceConfig {
                node_id: self
                    .node_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                default_call_timeout_ms: self.call_timeout_ms,
                max_concurrent_calls: self.max_concurrent_calls,
                expose_fault_detail: self.expose_fault_detail,
                trust_upstream_auth_ignore: self.trust_upstream_auth_ignore,
            },
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(port) = args.metrics_port {
        install_metrics_exporter(port)?;
    }

    let config = args.node_config();
    let registry = Arc::new(PipelineRegistry::new());
    register_default_interceptors(&registry, &config.service)?;

    match &args.jwt_secret {
        Some(secret) => {
            registry.register_filter(AuthenticationFilter::hs256(secret.as_bytes()).into_descriptor())?;
        }
        None => warn!("no JWT secret configured; calls are not authenticated"),
    }

    let mut dispatcher = Dispatcher::new();
    register_sample_methods(&config.service.node_id, &registry, &mut dispatcher)?;

    info!(
        node_id = %config.service.node_id,
        pubsub = %config.pubsub_component_name,
        statestore = %config.state_store_component_name,
        tracing_headers = %config.tracing_headers,
        "starting meshnode"
    );

    let mut node = NodeServer::new(config, registry, dispatcher);
    let port = node.start().await?;
    info!(port, "meshnode listening");

    node.serve(shutdown_signal()).await
}
