//! Execution report - per-resource outcomes of one reconciliation pass

use crate::error::NodeError;
use crate::types::ResourceRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Maximum stderr kept per failed record
pub const STDERR_TAIL_LIMIT: usize = 2048;

/// Final outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Probe showed the desired state; nothing was run
    SkippedAlreadySatisfied,
    /// Apply ran and the re-probe confirmed convergence
    Applied,
    /// Probe, apply or convergence check failed
    Failed,
    /// Not attempted because a dependency failed
    SkippedDependencyFailed,
    /// Dry run: the node would have been applied
    WouldApply,
    /// Not attempted or interrupted because the run was cancelled
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SkippedAlreadySatisfied => "ok",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::SkippedDependencyFailed => "skipped (dependency failed)",
            Self::WouldApply => "would apply",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether dependents of a node with this outcome must not run
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::SkippedDependencyFailed)
    }
}

/// Outcome of one resource in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub resource: ResourceRef,
    /// Position of the resource in the execution order
    pub position: usize,
    pub outcome: Outcome,
    /// Present iff `outcome` is `Failed`
    pub error: Option<NodeError>,
    pub duration: Duration,
}

impl ExecutionRecord {
    pub fn new(resource: ResourceRef, position: usize, outcome: Outcome) -> Self {
        Self {
            resource,
            position,
            outcome,
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// A failed record; the stderr tail carried by `error` is bounded
    pub fn failed(resource: ResourceRef, position: usize, error: NodeError) -> Self {
        let error = match error {
            NodeError::ExecutionFailed {
                command,
                exit_code,
                stderr_tail,
            } => NodeError::ExecutionFailed {
                command,
                exit_code,
                stderr_tail: bounded_tail(&stderr_tail, STDERR_TAIL_LIMIT).to_string(),
            },
            other => other,
        };
        Self {
            resource,
            position,
            outcome: Outcome::Failed,
            error: Some(error),
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Last `limit` bytes of `text`, cut on a character boundary
pub fn bounded_tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Applied
    pub succeeded: usize,
    /// Already satisfied
    pub skipped: usize,
    pub failed: usize,
    pub dependency_failed: usize,
    pub would_apply: usize,
    pub cancelled: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded
            + self.skipped
            + self.failed
            + self.dependency_failed
            + self.would_apply
            + self.cancelled
    }

    /// Every node was applied, already satisfied, or (dry run) would apply
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.dependency_failed == 0 && self.cancelled == 0
    }

    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.succeeded += 1,
            Outcome::SkippedAlreadySatisfied => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::SkippedDependencyFailed => self.dependency_failed += 1,
            Outcome::WouldApply => self.would_apply += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} already satisfied, {} failed",
            self.succeeded, self.skipped, self.failed
        )?;
        if self.dependency_failed > 0 {
            write!(f, ", {} skipped after failed dependency", self.dependency_failed)?;
        }
        if self.would_apply > 0 {
            write!(f, ", {} would apply", self.would_apply)?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Ordered, append-only record of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    records: Vec<ExecutionRecord>,
}

impl ExecutionReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            records: Vec::new(),
        }
    }

    /// Append a record. Only the reconciler's coordinator calls this.
    pub(crate) fn push(&mut self, record: ExecutionRecord) {
        self.records.push(record);
    }

    /// Records in completion order
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    /// Records in execution-plan order, for display
    pub fn records_in_plan_order(&self) -> Vec<&ExecutionRecord> {
        let mut sorted: Vec<&ExecutionRecord> = self.records.iter().collect();
        sorted.sort_by_key(|r| r.position);
        sorted
    }

    pub fn record_for(&self, resource: &ResourceRef) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.resource == *resource)
    }

    pub fn outcome_of(&self, resource: &ResourceRef) -> Option<Outcome> {
        self.record_for(resource).map(|r| r.outcome)
    }

    pub fn summarize(&self) -> Summary {
        let mut summary = Summary::default();
        for record in &self.records {
            summary.add(record.outcome);
        }
        summary
    }

    /// Process exit code: 1 iff any record failed
    pub fn exit_code(&self) -> i32 {
        i32::from(self.records.iter().any(|r| r.outcome == Outcome::Failed))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in self.records_in_plan_order() {
            write!(
                f,
                "{:<28} {:<40} {:>7.2}s",
                record.outcome.label(),
                record.resource.to_string(),
                record.duration.as_secs_f64()
            )?;
            if let Some(error) = &record.error {
                write!(f, "  [{}] {}", error.class(), error)?;
            }
            writeln!(f)?;
            if let Some(tail) = record.error.as_ref().and_then(NodeError::stderr_tail) {
                for line in tail.lines() {
                    writeln!(f, "    | {line}")?;
                }
            }
        }
        write!(f, "{}", self.summarize())
    }
}
