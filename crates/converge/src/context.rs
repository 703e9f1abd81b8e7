//! Provider and callback traits
//!
//! These traits keep the engine free of any knowledge about package
//! managers, processes or terminals. The binary supplies the concrete
//! implementations.

use crate::error::NodeError;
use crate::report::ExecutionRecord;
use crate::types::{Fact, Resource, ResourceRef};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Kind-specific probing and convergence
///
/// Implementations must never mutate state from `probe`, and `apply` must
/// be safe to re-run: provisioning is additive and nothing is rolled back.
pub trait Provider: Send + Sync {
    /// Observe the current state of `resource`
    ///
    /// Returns `NodeError::ProbeUnavailable` when the tool used to inspect
    /// the resource is missing, which is distinct from the resource being
    /// absent.
    fn probe(&self, resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError>;

    /// Move `resource` towards its desired state
    ///
    /// `fact` is the observation that showed the resource unsatisfied.
    /// Success is not trusted on its own; the reconciler re-probes.
    fn apply(&self, resource: &Resource, fact: &Fact, cancel: &CancelToken)
    -> Result<(), NodeError>;
}

/// Run-level cancellation signal
///
/// Cloning shares the flag. Once cancelled, no new nodes start and
/// in-flight commands are terminated by whoever polls the token.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for a reconciliation pass
///
/// All calls happen on the coordinating thread, in completion order.
pub trait ProgressCallback {
    /// Called once before any node starts
    fn on_run_start(&mut self, total: usize);

    /// Called when a node is handed to a worker
    fn on_node_start(&mut self, resource: &ResourceRef);

    /// Called when a node's record is final
    fn on_node_complete(&mut self, record: &ExecutionRecord);

    /// Called once after the last record
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_node_start(&mut self, _resource: &ResourceRef) {}
    fn on_node_complete(&mut self, _record: &ExecutionRecord) {}
    fn on_run_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
