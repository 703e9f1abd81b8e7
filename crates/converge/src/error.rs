//! Error taxonomy for graph building and reconciliation
//!
//! Graph errors are fatal and raised before any resource is touched.
//! Node errors are contained to the node they occur on (and its
//! dependents) and end up in that node's execution record.

use crate::types::ResourceRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors raised while building the task graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The `depends_on` relation contains a cycle
    #[error("dependency cycle: {}", format_cycle(.involved))]
    CyclicDependency {
        /// Resources on the cycle, in dependency order
        involved: Vec<ResourceRef>,
    },

    /// A resource depends on something that was never declared
    #[error("{from} depends on undeclared resource {missing}")]
    UnknownDependency {
        from: ResourceRef,
        missing: ResourceRef,
    },

    /// The same `(kind, identifier)` pair was declared twice
    #[error("resource {0} is declared more than once")]
    DuplicateResource(ResourceRef),
}

fn format_cycle(involved: &[ResourceRef]) -> String {
    let mut parts: Vec<String> = involved.iter().map(ToString::to_string).collect();
    if let Some(first) = involved.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Per-node failure recorded in the execution report
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum NodeError {
    /// The manager or tool needed to inspect the resource is not installed
    #[error("{tool} is not available on this machine")]
    ProbeUnavailable { tool: String },

    /// An external command exceeded its timeout and was terminated
    #[error("`{command}` timed out after {seconds}s")]
    ExecutionTimeout { command: String, seconds: u64 },

    /// An external command exited non-zero after all retry attempts
    #[error("`{command}` exited with code {exit_code}")]
    ExecutionFailed {
        command: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// The apply step finished but the re-probe does not show the target state
    #[error("expected {expected}, but found {observed}")]
    ConvergenceMismatch { expected: String, observed: String },

    /// The run was cancelled while this node was in flight
    #[error("cancelled")]
    Cancelled,

    /// Anything else (filesystem errors, unparsable tool output)
    #[error("{message}")]
    Other { message: String },
}

impl NodeError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Captured stderr of the failing command, if any
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { stderr_tail, .. } if !stderr_tail.trim().is_empty() => {
                Some(stderr_tail)
            }
            _ => None,
        }
    }

    /// Short name of the error class, used in reports
    pub fn class(&self) -> &'static str {
        match self {
            Self::ProbeUnavailable { .. } => "ProbeUnavailable",
            Self::ExecutionTimeout { .. } => "ExecutionTimeout",
            Self::ExecutionFailed { .. } => "ExecutionFailed",
            Self::ConvergenceMismatch { .. } => "ConvergenceMismatch",
            Self::Cancelled => "Cancelled",
            Self::Other { .. } => "Error",
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::other(err.to_string())
    }
}

/// Errors that prevent a reconciliation pass from starting
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
