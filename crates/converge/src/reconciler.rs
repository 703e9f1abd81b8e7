//! Resource reconciler - walks the task graph and converges each node
//!
//! A single coordinator (the calling thread) owns all scheduling state and
//! the report. Ready nodes are handed to a bounded rayon pool; workers only
//! probe and apply, then send their record back over a channel. A node is
//! ready once everything it requires or is ordered after has a final record.
//!
//! Per node: probe -> satisfied? -> apply -> re-probe. A failed node never
//! stops the run; its transitive dependents are recorded as
//! `SkippedDependencyFailed` without being attempted. A provider that panics
//! fails its own node like any other error.

use crate::context::{CancelToken, ProgressCallback, Provider};
use crate::error::{NodeError, ReconcileError};
use crate::graph::TaskGraph;
use crate::report::{ExecutionRecord, ExecutionReport, Outcome};
use crate::types::Resource;
use std::any::Any;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Instant;

/// Options for a reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Probe only; unsatisfied nodes are recorded as `WouldApply`
    pub dry_run: bool,
    /// Maximum number of nodes in flight
    pub concurrency: usize,
    /// Run-level cancellation
    pub cancel: CancelToken,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            concurrency: default_concurrency(),
            cancel: CancelToken::new(),
        }
    }
}

/// Number of available processing units
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Reconcile every node of `graph` against the machine
pub fn reconcile<P>(
    graph: TaskGraph,
    provider: &dyn Provider,
    opts: &ReconcileOptions,
    progress: &mut P,
) -> Result<ExecutionReport, ReconcileError>
where
    P: ProgressCallback + ?Sized,
{
    let concurrency = opts.concurrency.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("reconcile-{i}"))
        .build()?;

    let mut report = ExecutionReport::new(opts.dry_run);
    let total = graph.len();
    progress.on_run_start(total);
    log::info!(
        "Reconciling {} resources (concurrency {}, dry run: {})",
        total,
        concurrency,
        opts.dry_run
    );

    let mut waiting: Vec<usize> = (0..total)
        .map(|i| graph.requires(i).len() + graph.ordered_after(i).len())
        .collect();
    let mut outcomes: Vec<Option<Outcome>> = vec![None; total];
    let mut ready: BTreeSet<usize> = (0..total).filter(|&i| waiting[i] == 0).collect();

    let graph = &graph;
    let (tx, rx) = mpsc::channel::<ExecutionRecord>();

    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;

        loop {
            while in_flight < concurrency {
                let Some(position) = ready.pop_first() else {
                    break;
                };
                let resource = graph.resource(position);

                let blocked = if opts.cancel.is_cancelled() {
                    Some(Outcome::Cancelled)
                } else if graph
                    .requires(position)
                    .iter()
                    .any(|&dep| outcomes[dep].is_some_and(|o| o.blocks_dependents()))
                {
                    Some(Outcome::SkippedDependencyFailed)
                } else {
                    None
                };

                if let Some(outcome) = blocked {
                    log::debug!("{}: {}", resource.reference(), outcome.label());
                    let record = ExecutionRecord::new(resource.reference(), position, outcome);
                    complete(
                        graph,
                        record,
                        &mut report,
                        &mut outcomes,
                        &mut waiting,
                        &mut ready,
                        progress,
                    );
                    continue;
                }

                progress.on_node_start(&resource.reference());
                let tx = tx.clone();
                let cancel = opts.cancel.clone();
                let dry_run = opts.dry_run;
                scope.spawn(move |_| {
                    let record = process_node(resource, position, provider, dry_run, &cancel);
                    // The coordinator outlives every worker; a send error is unreachable
                    let _ = tx.send(record);
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            match rx.recv() {
                Ok(record) => {
                    in_flight -= 1;
                    complete(
                        graph,
                        record,
                        &mut report,
                        &mut outcomes,
                        &mut waiting,
                        &mut ready,
                        progress,
                    );
                }
                Err(_) => break,
            }
        }
    });

    progress.on_run_complete();
    let summary = report.summarize();
    log::info!("Reconciliation finished: {summary}");
    Ok(report)
}

/// Record a final outcome and release nodes waiting on it
fn complete<P>(
    graph: &TaskGraph,
    record: ExecutionRecord,
    report: &mut ExecutionReport,
    outcomes: &mut [Option<Outcome>],
    waiting: &mut [usize],
    ready: &mut BTreeSet<usize>,
    progress: &mut P,
) where
    P: ProgressCallback + ?Sized,
{
    let position = record.position;
    outcomes[position] = Some(record.outcome);
    progress.on_node_complete(&record);
    report.push(record);

    for &dependent in graph.dependents(position) {
        waiting[dependent] -= 1;
        if waiting[dependent] == 0 {
            ready.insert(dependent);
        }
    }
}

/// Probe, apply and confirm a single node (runs on a worker thread)
fn process_node(
    resource: &Resource,
    position: usize,
    provider: &dyn Provider,
    dry_run: bool,
    cancel: &CancelToken,
) -> ExecutionRecord {
    let started = Instant::now();
    let reference = resource.reference();

    // Every started node must send a record, or the coordinator waits forever
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        converge_node(resource, provider, dry_run, cancel)
    }))
    .unwrap_or_else(|payload| {
        Err(NodeError::other(format!(
            "provider panicked: {}",
            panic_message(payload.as_ref())
        )))
    });
    let record = match result {
        Ok(outcome) => ExecutionRecord::new(reference, position, outcome),
        Err(NodeError::Cancelled) => {
            ExecutionRecord::new(reference, position, Outcome::Cancelled)
        }
        Err(err) => {
            log::warn!("{}: {}", resource.reference(), err);
            ExecutionRecord::failed(reference, position, err)
        }
    };
    record.with_duration(started.elapsed())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn converge_node(
    resource: &Resource,
    provider: &dyn Provider,
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<Outcome, NodeError> {
    let reference = resource.reference();
    log::debug!("{reference}: probing");
    let fact = provider.probe(resource, cancel)?;

    if fact.satisfies(resource) {
        log::debug!("{reference}: satisfied ({fact})");
        return Ok(Outcome::SkippedAlreadySatisfied);
    }

    if dry_run {
        log::info!("{reference}: would apply ({fact})");
        return Ok(Outcome::WouldApply);
    }

    if cancel.is_cancelled() {
        return Err(NodeError::Cancelled);
    }

    log::info!("{reference}: applying ({fact})");
    provider.apply(resource, &fact, cancel)?;

    let after = provider.probe(resource, cancel)?;
    if after.satisfies(resource) {
        log::info!("{reference}: applied");
        Ok(Outcome::Applied)
    } else {
        Err(NodeError::ConvergenceMismatch {
            expected: resource.describe_target(),
            observed: after.to_string(),
        })
    }
}
