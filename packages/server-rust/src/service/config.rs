/// Pipeline-level configuration for call execution.
///
/// Controls call deadlines, admission limits, and how much fault detail is
/// returned to callers.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unique identifier for this node.
    pub node_id: String,
    /// Dispatch deadline in milliseconds when the caller supplies none.
    /// 0 disables the deadline.
    pub default_call_timeout_ms: u64,
    /// Maximum number of calls in flight before new calls fault with `Overloaded`.
    pub max_concurrent_calls: u32,
    /// Whether diagnostic `detail` on node-raised faults is sent to callers.
    pub expose_fault_detail: bool,
    /// Whether an inbound `AuthIgnore` marker from an upstream node is kept.
    /// When off, the marker is stripped before the call enters the pipeline
    /// and only filters running for this call can set it.
    pub trust_upstream_auth_ignore: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_call_timeout_ms: 15_000,
            max_concurrent_calls: 1000,
            expose_fault_detail: false,
            trust_upstream_auth_ignore: false,
        }
    }
}
