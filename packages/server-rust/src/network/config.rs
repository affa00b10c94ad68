//! Node configuration and the tracing-header allow-list.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use meshnode_core::Metadata;

use crate::service::ServiceConfig;

/// Errors from validating a [`NodeConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid tracing header name `{0}`")]
    InvalidTracingHeader(String),
    #[error("invalid CORS origin `{0}`")]
    InvalidCorsOrigin(String),
    #[error("{0} component name must not be empty")]
    EmptyComponentName(&'static str),
}

// ---------------------------------------------------------------------------
// TracingHeaders
// ---------------------------------------------------------------------------

/// Case-insensitive allow-list of inbound headers copied into call metadata.
///
/// Entries keep the spelling they were configured with; that spelling is the
/// metadata key handlers see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingHeaders {
    entries: Vec<(String, HeaderName)>,
}

impl TracingHeaders {
    /// Header list used when none is configured.
    pub const DEFAULT: &'static str = "Authentication,AuthIgnore";

    /// Parses a comma-separated list. Blank entries are skipped and later
    /// duplicates (ignoring case) are dropped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTracingHeader` for names that are not
    /// valid HTTP header names.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        let mut entries: Vec<(String, HeaderName)> = Vec::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let name = HeaderName::from_bytes(raw.as_bytes())
                .map_err(|_| ConfigError::InvalidTracingHeader(raw.to_string()))?;
            if entries.iter().all(|(_, known)| *known != name) {
                entries.push((raw.to_string(), name));
            }
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(spelling, _)| spelling.eq_ignore_ascii_case(name))
    }

    /// Configured spellings, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(spelling, _)| spelling.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies allow-listed headers into metadata. Non-text values and
    /// headers outside the list are ignored; repeated headers keep the first.
    #[must_use]
    pub fn extract(&self, headers: &HeaderMap) -> Metadata {
        self.entries
            .iter()
            .filter_map(|(spelling, name)| {
                let value = headers.get(name)?.to_str().ok()?;
                Some((spelling.clone(), value.to_string()))
            })
            .collect()
    }
}

impl Default for TracingHeaders {
    fn default() -> Self {
        Self {
            entries: vec![
                ("Authentication".to_string(), HeaderName::from_static("authentication")),
                ("AuthIgnore".to_string(), HeaderName::from_static("authignore")),
            ],
        }
    }
}

impl FromStr for TracingHeaders {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TracingHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.names().collect();
        f.write_str(&joined.join(","))
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Startup configuration for a mesh node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bind address.
    pub host: String,
    /// Port the sidecar calls into. 0 means OS-assigned.
    pub port: u16,
    /// Pub/sub component advertised on `/dapr/subscribe`.
    pub pubsub_component_name: String,
    /// State store component available to business methods.
    pub state_store_component_name: String,
    /// Headers propagated into call metadata.
    pub tracing_headers: TracingHeaders,
    /// Whether the CORS layer is installed.
    pub use_cors: bool,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
    /// HTTP-level request deadline.
    pub request_timeout: Duration,
    /// Call execution settings.
    pub service: ServiceConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            pubsub_component_name: "pubsub".to_string(),
            state_store_component_name: "statestore".to_string(),
            tracing_headers: TracingHeaders::default(),
            use_cors: true,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            service: ServiceConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Checks values that cannot be enforced by the types.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pubsub_component_name.trim().is_empty() {
            return Err(ConfigError::EmptyComponentName("pub/sub"));
        }
        if self.state_store_component_name.trim().is_empty() {
            return Err(ConfigError::EmptyComponentName("state store"));
        }
        if self.use_cors {
            for origin in self.cors_origins.iter().filter(|o| *o != "*") {
                HeaderValue::from_str(origin)
                    .map_err(|_| ConfigError::InvalidCorsOrigin(origin.clone()))?;
            }
        }
        Ok(())
    }
}
