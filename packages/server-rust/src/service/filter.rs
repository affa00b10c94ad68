//! Authorization filter chain evaluated before dispatch.
//!
//! Filters are either global or scoped to one method. At seal time the chain
//! merges globals with each method's scoped filters into one ordered table,
//! so evaluation is a plain slice walk with no sorting or locking.
//!
//! Ordering: ascending `priority`; equal priorities run in registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshnode_core::CallContext;

/// Decision of a single filter, and of the chain as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Allow,
    Reject(String),
}

impl FilterVerdict {
    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }

    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A guard evaluated before dispatch.
///
/// Filters may read and write the context (populate the principal, set
/// metadata markers) but never dispatch the call themselves.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict;
}

/// Which calls a filter applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterScope {
    /// Every call.
    Global,
    /// Only calls targeting this method identifier.
    Method(String),
}

/// Registration entry for one filter.
#[derive(Clone)]
pub struct FilterDescriptor {
    pub name: String,
    pub priority: i32,
    pub scope: FilterScope,
    pub filter: Arc<dyn Filter>,
}

impl FilterDescriptor {
    /// A filter that runs for every call.
    pub fn global(name: impl Into<String>, priority: i32, filter: impl Filter + 'static) -> Self {
        Self {
            name: name.into(),
            priority,
            scope: FilterScope::Global,
            filter: Arc::new(filter),
        }
    }

    /// A filter attached to a single method.
    pub fn for_method(
        name: impl Into<String>,
        method: impl Into<String>,
        priority: i32,
        filter: impl Filter + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            scope: FilterScope::Method(method.into()),
            filter: Arc::new(filter),
        }
    }

    fn applies_to(&self, method: &str) -> bool {
        match &self.scope {
            FilterScope::Global => true,
            FilterScope::Method(m) => m == method,
        }
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FilterChain
// ---------------------------------------------------------------------------

/// Immutable filter table built once from the registered descriptors.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    /// Filters for methods without scoped entries.
    global: Vec<FilterDescriptor>,
    /// Globals merged with the method's own filters, in execution order.
    by_method: HashMap<String, Vec<FilterDescriptor>>,
}

impl FilterChain {
    /// Builds the table. `descriptors` must be in registration order.
    #[must_use]
    pub fn build(mut descriptors: Vec<FilterDescriptor>) -> Self {
        // Stable sort keeps registration order among equal priorities.
        descriptors.sort_by_key(|d| d.priority);

        let global: Vec<FilterDescriptor> = descriptors
            .iter()
            .filter(|d| d.scope == FilterScope::Global)
            .cloned()
            .collect();

        let mut by_method = HashMap::new();
        for d in &descriptors {
            if let FilterScope::Method(method) = &d.scope {
                by_method.entry(method.clone()).or_insert_with(|| {
                    descriptors
                        .iter()
                        .filter(|candidate| candidate.applies_to(method))
                        .cloned()
                        .collect::<Vec<_>>()
                });
            }
        }

        Self { global, by_method }
    }

    /// Filters that run for `method`, in execution order.
    #[must_use]
    pub fn filters_for(&self, method: &str) -> &[FilterDescriptor] {
        self.by_method
            .get(method)
            .map_or(self.global.as_slice(), Vec::as_slice)
    }

    /// Total number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        let scoped: usize = self
            .by_method
            .values()
            .map(|filters| filters.len() - self.global.len())
            .sum();
        self.global.len() + scoped
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the filters for the call's method, stopping at the first reject.
    pub async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
        for descriptor in self.filters_for(&ctx.method) {
            if let FilterVerdict::Reject(reason) = descriptor.filter.evaluate(ctx).await {
                tracing::debug!(
                    call_id = ctx.call_id,
                    method = %ctx.method,
                    filter = %descriptor.name,
                    reason = %reason,
                    "filter rejected call"
                );
                return FilterVerdict::Reject(reason);
            }
        }
        FilterVerdict::Allow
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    /// Records its name and returns a fixed verdict.
    struct Logged {
        name: String,
        verdict: FilterVerdict,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for Logged {
        async fn evaluate(&self, _ctx: &mut CallContext) -> FilterVerdict {
            self.log.lock().push(self.name.clone());
            self.verdict.clone()
        }
    }

    fn logged(name: &str, verdict: FilterVerdict, log: &Arc<Mutex<Vec<String>>>) -> Logged {
        Logged {
            name: name.to_string(),
            verdict,
            log: log.clone(),
        }
    }

    fn ctx(method: &str) -> CallContext {
        CallContext::new(1, method, json!({}), 1000)
    }

    #[tokio::test]
    async fn empty_chain_allows() {
        let chain = FilterChain::build(Vec::new());
        assert!(chain.is_empty());
        assert_eq!(chain.evaluate(&mut ctx("Ping")).await, FilterVerdict::Allow);
    }

    #[tokio::test]
    async fn scoped_filters_only_run_for_their_method() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::build(vec![
            FilterDescriptor::global("g", 5, logged("g", FilterVerdict::Allow, &log)),
            FilterDescriptor::for_method(
                "t",
                "Transfer",
                1,
                logged("t", FilterVerdict::Allow, &log),
            ),
        ]);
        assert_eq!(chain.len(), 2);

        chain.evaluate(&mut ctx("Ping")).await;
        assert_eq!(*log.lock(), vec!["g"]);

        log.lock().clear();
        chain.evaluate(&mut ctx("Transfer")).await;
        assert_eq!(*log.lock(), vec!["t", "g"]);
    }

    #[tokio::test]
    async fn first_reject_short_circuits_higher_priorities() {
        let log = Arc::new(Mutex::new(Vec::new()));
        // Registered out of order on purpose.
        let chain = FilterChain::build(vec![
            FilterDescriptor::for_method(
                "p2",
                "Transfer",
                2,
                logged("p2", FilterVerdict::Allow, &log),
            ),
            FilterDescriptor::for_method(
                "p1",
                "Transfer",
                1,
                logged("p1", FilterVerdict::reject("limit exceeded"), &log),
            ),
        ]);

        let verdict = chain.evaluate(&mut ctx("Transfer")).await;
        assert_eq!(verdict, FilterVerdict::reject("limit exceeded"));
        assert_eq!(*log.lock(), vec!["p1"]);
    }

    #[tokio::test]
    async fn equal_priority_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::build(vec![
            FilterDescriptor::global("first", 0, logged("first", FilterVerdict::Allow, &log)),
            FilterDescriptor::global("second", 0, logged("second", FilterVerdict::Allow, &log)),
            FilterDescriptor::global("early", -1, logged("early", FilterVerdict::Allow, &log)),
        ]);

        chain.evaluate(&mut ctx("Ping")).await;
        assert_eq!(*log.lock(), vec!["early", "first", "second"]);
    }

    #[tokio::test]
    async fn filters_can_mark_context_for_later_filters() {
        struct Mark;
        #[async_trait]
        impl Filter for Mark {
            async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
                ctx.metadata.insert("AuthIgnore", "true");
                FilterVerdict::Allow
            }
        }
        struct Strict;
        #[async_trait]
        impl Filter for Strict {
            async fn evaluate(&self, ctx: &mut CallContext) -> FilterVerdict {
                if ctx.metadata.contains("AuthIgnore") {
                    FilterVerdict::Allow
                } else {
                    FilterVerdict::reject("unauthenticated")
                }
            }
        }

        let chain = FilterChain::build(vec![
            FilterDescriptor::global("strict", 10, Strict),
            FilterDescriptor::for_method("mark", "Login", 0, Mark),
        ]);

        assert!(chain.evaluate(&mut ctx("Login")).await.is_allow());
        assert_eq!(
            chain.evaluate(&mut ctx("Transfer")).await,
            FilterVerdict::reject("unauthenticated")
        );
    }

    proptest! {
        #[test]
        fn distinct_priorities_always_execute_ascending(
            priorities in proptest::collection::hash_set(-1000i32..1000, 1..12)
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let descriptors: Vec<_> = priorities
                .iter()
                .map(|p| {
                    let name = p.to_string();
                    FilterDescriptor::global(name.clone(), *p, logged(&name, FilterVerdict::Allow, &log))
                })
                .collect();
            let chain = FilterChain::build(descriptors);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(chain.evaluate(&mut ctx("Any")));

            let executed: Vec<i32> = log.lock().iter().map(|s| s.parse().unwrap()).collect();
            let mut expected: Vec<i32> = priorities.into_iter().collect();
            expected.sort_unstable();
            prop_assert_eq!(executed, expected);
        }
    }
}
