//! # Function Invocation
//!
//! Everything between a resolved function node and the remote function:
//!
//! - [`next_invocation_id`] - process-wide identity for log correlation
//! - [`Gateway`] - transport seam ([`HttpGateway`] for real runs, [`MockGateway`] for tests)
//! - [`DeclaredConstraints`] - typed timing constraints and FT settings
//! - [`FaultToleranceEngine`] - retry + failover across configured providers

mod constraints;
mod fault_tolerance;
mod gateway;
mod mock;
mod retry;

pub use constraints::{
    DeclaredConstraints, FaultToleranceSettings, TimingConstraints, FT_ALTERNATIVE, FT_RETRIES,
    LATEST_FINISHING_TIME, LATEST_STARTING_TIME, MAX_RUNNING_TIME,
};
pub use fault_tolerance::{Attempt, FailoverReport, FaultToleranceEngine};
pub use gateway::{Gateway, HttpGateway};
pub use mock::{MockGateway, MockReply, RecordedCall};
pub use retry::Backoff;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::node::DataValues;

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(0);

/// Hand out the next invocation identity.
///
/// Unique and strictly increasing for the lifetime of the process, no matter
/// how many tasks ask concurrently.
pub fn next_invocation_id() -> u64 {
    NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Raw result of one invocation plus its round-trip time
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    /// `None` when the function returned an empty body
    pub result: Option<String>,
    pub rtt: Duration,
}

impl PairResult {
    pub fn new(result: Option<String>, rtt: Duration) -> Self {
        Self { result, rtt }
    }

    pub fn rtt_ms(&self) -> u64 {
        self.rtt.as_millis() as u64
    }
}

/// One invocation as the fault-tolerance engine sees it
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub node_name: Arc<str>,
    /// Primary endpoint (the node's `resource` property)
    pub endpoint: String,
    pub inputs: DataValues,
    pub deployment: Option<String>,
    pub constraints: DeclaredConstraints,
}

impl InvocationRequest {
    pub fn needs_fault_tolerance(&self) -> bool {
        self.constraints.needs_fault_tolerance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ids_are_unique() {
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..100 {
            set.spawn(async { next_invocation_id() });
        }

        let mut ids = HashSet::new();
        while let Some(id) = set.join_next().await {
            ids.insert(id.unwrap());
        }
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn ids_increase() {
        let a = next_invocation_id();
        let b = next_invocation_id();
        assert!(b > a);
    }
}
