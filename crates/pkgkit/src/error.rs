//! Error types for external command execution.
//!
//! Errors are categorized to decide whether a failed invocation is worth
//! retrying. A non-zero exit is normally retried (for commands marked
//! idempotent), unless the tool's stderr shows the failure is permanent,
//! such as an unknown package name.

use converge::NodeError;
use std::time::Duration;
use thiserror::Error;

/// Maximum stderr carried into a node error
const STDERR_TAIL: usize = 2048;

/// Categories of command errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Timeouts, lock contention, network hiccups (retryable)
    Transient,
    /// The tool reported that the requested package does not exist
    NotFound,
    /// The tool binary itself is missing
    ToolMissing,
    /// The run was cancelled
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors that can occur while running external commands.
#[derive(Debug, Error)]
pub enum Error {
    /// The program could not be spawned because it does not exist
    #[error("command not found: {command}")]
    CommandNotFound {
        /// Program that was looked up
        command: String,
    },

    /// The process exceeded its timeout and was killed
    #[error("`{command}` timed out after {}s", .after.as_secs())]
    Timeout {
        /// Full command line
        command: String,
        /// Configured timeout
        after: Duration,
    },

    /// The process exited non-zero
    #[error("`{command}` exited with code {exit_code}")]
    Failed {
        /// Full command line
        command: String,
        /// Exit code, -1 when terminated by a signal
        exit_code: i32,
        /// Captured (bounded) standard error
        stderr: String,
    },

    /// The run-level cancellation token fired; the process was killed
    #[error("`{command}` was cancelled")]
    Cancelled {
        /// Full command line
        command: String,
    },

    /// A tool produced output that could not be interpreted
    #[error("unexpected output from `{command}`: {message}")]
    UnexpectedOutput {
        /// Full command line
        command: String,
        /// What was wrong with it
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Timeout { .. } => ErrorCategory::Transient,
            Error::Failed { stderr, .. } => classify_stderr(stderr),
            Error::CommandNotFound { .. } => ErrorCategory::ToolMissing,
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Analyze stderr to tell permanent failures from transient ones.
fn classify_stderr(stderr: &str) -> ErrorCategory {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("unable to locate package")
        || stderr_lower.contains("has no installation candidate")
        || stderr_lower.contains("no available formula")
        || stderr_lower.contains("no formulae or casks found")
        || stderr_lower.contains("no matching distribution found")
        || stderr_lower.contains("could not find a version that satisfies")
        || stderr_lower.contains("snap \"") && stderr_lower.contains("not found")
        || stderr_lower.contains("returned error: 404")
        || stderr_lower.contains("repository not found")
    {
        return ErrorCategory::NotFound;
    }

    ErrorCategory::Transient
}

impl From<Error> for NodeError {
    fn from(err: Error) -> Self {
        match err {
            Error::CommandNotFound { command } => NodeError::ProbeUnavailable { tool: command },
            Error::Timeout { command, after } => NodeError::ExecutionTimeout {
                command,
                seconds: after.as_secs(),
            },
            Error::Failed {
                command,
                exit_code,
                stderr,
            } => NodeError::ExecutionFailed {
                command,
                exit_code,
                stderr_tail: converge::bounded_tail(stderr.trim_end(), STDERR_TAIL).to_string(),
            },
            Error::Cancelled { .. } => NodeError::Cancelled,
            other => NodeError::other(other.to_string()),
        }
    }
}

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Error>;
