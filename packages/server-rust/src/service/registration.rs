//! Startup-time registration of filters, interceptors and subscriptions.
//!
//! A [`PipelineRegistry`] collects registrations while the node boots. Sealing
//! it produces an immutable [`PipelineRegistration`] shared by every call
//! through an `Arc`. After sealing, every registration attempt fails with
//! [`RegistrationError::Misuse`] and the sealed snapshot is left untouched.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;

use super::filter::{FilterChain, FilterDescriptor};
use super::interceptor::{
    AfterInvokeHandler, BeforeSendHandler, ContextHandler, ExceptionHandler, InterceptorChain,
};

/// Errors from the registration API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration misuse: cannot register {what} after the node started accepting calls")]
    Misuse { what: &'static str },
    #[error("method `{0}` is already registered")]
    DuplicateMethod(String),
}

/// A pub/sub topic routed to a method on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    pub method: String,
}

impl Subscription {
    /// HTTP route the sidecar delivers events to.
    #[must_use]
    pub fn route(&self) -> String {
        format!("/{}", self.method)
    }
}

// ---------------------------------------------------------------------------
// PipelineRegistration
// ---------------------------------------------------------------------------

/// Immutable pipeline configuration read concurrently by all calls.
#[derive(Debug, Default)]
pub struct PipelineRegistration {
    filters: FilterChain,
    interceptors: InterceptorChain,
    subscriptions: Vec<Subscription>,
}

impl PipelineRegistration {
    #[must_use]
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

// ---------------------------------------------------------------------------
// PipelineRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Draft {
    filters: Vec<FilterDescriptor>,
    interceptors: InterceptorChain,
    subscriptions: Vec<Subscription>,
}

/// Mutable registration front-end used during startup.
///
/// The mutex only guards the registration path; calls read the sealed
/// snapshot without locking.
pub struct PipelineRegistry {
    draft: Mutex<Option<Draft>>,
    sealed: OnceLock<Arc<PipelineRegistration>>,
}

impl PipelineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            draft: Mutex::new(Some(Draft::default())),
            sealed: OnceLock::new(),
        }
    }

    fn with_draft(
        &self,
        what: &'static str,
        f: impl FnOnce(&mut Draft),
    ) -> Result<(), RegistrationError> {
        let mut guard = self.draft.lock();
        let Some(draft) = guard.as_mut() else {
            tracing::error!(what, "registration attempted after the node started");
            return Err(RegistrationError::Misuse { what });
        };
        f(draft);
        Ok(())
    }

    /// Registers one handler per role; `None` leaves that role unchanged.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Misuse` once the registry is sealed.
    pub fn register_pipeline_handler(
        &self,
        context: Option<Arc<dyn ContextHandler>>,
        before_send: Option<Arc<dyn BeforeSendHandler>>,
        after_invoke: Option<Arc<dyn AfterInvokeHandler>>,
        exception: Option<Arc<dyn ExceptionHandler>>,
    ) -> Result<(), RegistrationError> {
        self.with_draft("pipeline handler", |draft| {
            draft
                .interceptors
                .push(context, before_send, after_invoke, exception);
        })
    }

    /// Registers a global or method-scoped filter.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Misuse` once the registry is sealed.
    pub fn register_filter(&self, descriptor: FilterDescriptor) -> Result<(), RegistrationError> {
        self.with_draft("filter", |draft| draft.filters.push(descriptor))
    }

    /// Routes a pub/sub topic to a method.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Misuse` once the registry is sealed.
    pub fn register_subscription(
        &self,
        topic: impl Into<String>,
        method: impl Into<String>,
    ) -> Result<(), RegistrationError> {
        let subscription = Subscription {
            topic: topic.into(),
            method: method.into(),
        };
        self.with_draft("subscription", |draft| {
            draft.subscriptions.push(subscription);
        })
    }

    /// Freezes the registrations. Allowed exactly once.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Misuse` if the registry was already sealed.
    pub fn seal(&self) -> Result<Arc<PipelineRegistration>, RegistrationError> {
        let draft = self
            .draft
            .lock()
            .take()
            .ok_or(RegistrationError::Misuse { what: "seal" })?;

        let registration = Arc::new(PipelineRegistration {
            filters: FilterChain::build(draft.filters),
            interceptors: draft.interceptors,
            subscriptions: draft.subscriptions,
        });

        tracing::info!(
            filters = registration.filters.len(),
            interceptors = ?registration.interceptors,
            subscriptions = registration.subscriptions.len(),
            "pipeline registration sealed"
        );

        // The draft was taken under the lock, so only one caller gets here.
        let _ = self.sealed.set(Arc::clone(&registration));
        Ok(registration)
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// The sealed registration, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<PipelineRegistration>> {
        self.sealed.get().cloned()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
