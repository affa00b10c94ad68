//! Authentication and authorization filters.
//!
//! - [`AuthIgnoreFilter`]: method-scoped marker for anonymous methods
//! - [`AuthenticationFilter`]: global bearer-JWT check that populates the principal
//! - [`RequireRoleFilter`]: method-scoped role check
//!
//! An inbound `AuthIgnore` header is stripped before the pipeline runs
//! unless `ServiceConfig::trust_upstream_auth_ignore` is set, so by default
//! only [`AuthIgnoreFilter`] can mark a call anonymous.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use meshnode_core::metadata::keys;
use meshnode_core::{CallContext, Principal};
use serde::{Deserialize, Serialize};

use crate::service::filter::{Filter, FilterDescriptor, FilterVerdict};

/// Priority of [`AuthIgnoreFilter`]; runs before authentication.
pub const AUTH_IGNORE_PRIORITY: i32 = -100;
/// Priority of [`AuthenticationFilter`].
pub const AUTHENTICATION_PRIORITY: i32 = 0;
/// Priority of [`RequireRoleFilter`]; runs once the principal is known.
pub const AUTHORIZATION_PRIORITY: i32 = 100;

/// Rejection reason when no valid credential is present.
pub const UNAUTHENTICATED: &str = "unauthenticated";
/// Rejection reason when the principal lacks a required role.
pub const FORBIDDEN: &str = "forbidden";

/// JWT claims accepted by [`AuthenticationFilter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: u64,
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

// ---------------------------------------------------------------------------
// AuthIgnoreFilter
// ---------------------------------------------------------------------------

/// Marks a call as anonymous so the authentication filter lets it through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthIgnoreFilter;

impl AuthIgnoreFilter {
    /// Descriptor attaching the marker to `method`.
    pub fn for_method(method: impl Into<String>) -> FilterDescriptor {
        let method = method.into();
        FilterDescriptor::for_method(
            format!("auth-ignore:{method}"),
            method,
            AUTH_IGNORE_PRIORITY,
            Self,
        )
    }
}

#[async_trait]
impl Filter for AuthIgnoreFilter {
    async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
        ctx.metadata.insert(keys::AUTH_IGNORE, "true");
        FilterVerdict::Allow
    }
}

// ---------------------------------------------------------------------------
// AuthenticationFilter
// ---------------------------------------------------------------------------

/// Verifies the `Authentication` bearer token and populates the principal.
pub struct AuthenticationFilter {
    key: DecodingKey,
    validation: Validation,
}

impl AuthenticationFilter {
    /// HMAC-SHA256 verification with a shared secret.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Global descriptor at [`AUTHENTICATION_PRIORITY`].
    #[must_use]
    pub fn into_descriptor(self) -> FilterDescriptor {
        FilterDescriptor::global("authentication", AUTHENTICATION_PRIORITY, self)
    }

    fn verify(&self, raw: &str) -> Option<Principal> {
        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .unwrap_or(raw)
            .trim();
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(Principal {
                id: data.claims.sub,
                roles: data.claims.roles,
            }),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                None
            }
        }
    }
}

#[async_trait]
impl Filter for AuthenticationFilter {
    async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
        if ctx.metadata.get(keys::AUTH_IGNORE).is_some_and(is_truthy) {
            return FilterVerdict::Allow;
        }
        let principal = ctx
            .metadata
            .get(keys::AUTHENTICATION)
            .and_then(|raw| self.verify(raw));
        match principal {
            Some(principal) => {
                ctx.principal = Some(principal);
                FilterVerdict::Allow
            }
            None => FilterVerdict::reject(UNAUTHENTICATED),
        }
    }
}

// ---------------------------------------------------------------------------
// RequireRoleFilter
// ---------------------------------------------------------------------------

/// Rejects calls whose principal lacks `role`.
#[derive(Debug, Clone)]
pub struct RequireRoleFilter {
    role: String,
}

impl RequireRoleFilter {
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    /// Descriptor attaching the role requirement to `method`.
    pub fn for_method(method: impl Into<String>, role: impl Into<String>) -> FilterDescriptor {
        let method = method.into();
        let filter = Self::new(role);
        FilterDescriptor::for_method(
            format!("require-role:{}:{method}", filter.role),
            method,
            AUTHORIZATION_PRIORITY,
            filter,
        )
    }
}

#[async_trait]
impl Filter for RequireRoleFilter {
    async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
        match &ctx.principal {
            None => FilterVerdict::reject(UNAUTHENTICATED),
            Some(p) if p.has_role(&self.role) => FilterVerdict::Allow,
            Some(_) => FilterVerdict::reject(FORBIDDEN),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
