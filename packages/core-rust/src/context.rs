//! Per-invocation state carrier.

use crate::fault::Fault;
use crate::metadata::Metadata;
use crate::types::{Principal, Value};

/// Position of a call in the interception state machine.
///
/// Happy path: `ContextBuilt -> BeforeSendRun -> Dispatched -> AfterInvokeRun -> Completed`.
/// Any state after `ContextBuilt` (and `ContextBuilt` itself) may move to
/// `ExceptionRun`, which always ends in `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    ContextBuilt,
    BeforeSendRun,
    Dispatched,
    AfterInvokeRun,
    Completed,
    ExceptionRun,
    Faulted,
}

impl CallState {
    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use CallState::{
            AfterInvokeRun, BeforeSendRun, Completed, ContextBuilt, Dispatched, ExceptionRun,
            Faulted,
        };
        match (self, next) {
            (ContextBuilt, BeforeSendRun)
            | (BeforeSendRun, Dispatched)
            | (Dispatched, AfterInvokeRun)
            | (AfterInvokeRun, Completed)
            | (ExceptionRun, Faulted) => true,
            (ContextBuilt | BeforeSendRun | Dispatched | AfterInvokeRun, ExceptionRun) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextBuilt => "context_built",
            Self::BeforeSendRun => "before_send_run",
            Self::Dispatched => "dispatched",
            Self::AfterInvokeRun => "after_invoke_run",
            Self::Completed => "completed",
            Self::ExceptionRun => "exception_run",
            Self::Faulted => "faulted",
        }
    }
}

/// Result slot of a call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallOutcome {
    #[default]
    Pending,
    Success(Value),
    Fault(Fault),
}

impl CallOutcome {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// State carried with one inbound call through every pipeline stage.
///
/// Created fresh per call and owned by the call's task; never shared between
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Node-unique call identifier.
    pub call_id: u64,
    /// Distributed trace identifier. Assigned by a context handler if absent.
    pub trace_id: Option<String>,
    /// Identifier of the target business method.
    pub method: String,
    /// Authenticated caller, populated by filters.
    pub principal: Option<Principal>,
    /// Propagated headers and handler annotations.
    pub metadata: Metadata,
    /// Opaque request payload.
    pub payload: Value,
    /// Deadline for the dispatch stage in milliseconds.
    pub call_timeout_ms: u64,
    state: CallState,
    outcome: CallOutcome,
}

impl CallContext {
    #[must_use]
    pub fn new(call_id: u64, method: impl Into<String>, payload: Value, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            trace_id: None,
            method: method.into(),
            principal: None,
            metadata: Metadata::new(),
            payload,
            call_timeout_ms,
            state: CallState::ContextBuilt,
            outcome: CallOutcome::Pending,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Moves the call to `next`. Returns false, leaving the state untouched,
    /// if the transition is not allowed.
    pub fn advance(&mut self, next: CallState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn outcome(&self) -> &CallOutcome {
        &self.outcome
    }

    /// Fills the result slot. Only the first terminal outcome is kept;
    /// returns false if the slot was already populated.
    pub fn set_outcome(&mut self, outcome: CallOutcome) -> bool {
        if !self.outcome.is_pending() || outcome.is_pending() {
            return false;
        }
        self.outcome = outcome;
        true
    }

    /// Consumes the context, returning its outcome.
    #[must_use]
    pub fn into_outcome(self) -> CallOutcome {
        self.outcome
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}
