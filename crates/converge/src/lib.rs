//! # Converge
//!
//! Dependency-ordered reconciliation of declared machine state.
//!
//! ## Core Concepts
//!
//! - **Resource**: a declared unit of desired state (a package, a git
//!   checkout, the login shell, a font bundle)
//! - **Fact**: what a probe observed for one resource right now
//! - **TaskGraph**: resources plus their dependency edges, in a stable
//!   execution order
//! - **Reconciler**: probes each node, applies what is missing, re-probes to
//!   confirm, and contains failures to the failing node's dependents
//! - **ExecutionReport**: one record per resource per run
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     DesiredState, DesiredStateDocument, NoProgress, ReconcileOptions, Resource,
//!     ResourceKind, graph, reconcile,
//! };
//!
//! let zsh = Resource::new(ResourceKind::SystemPackage, "zsh", DesiredState::Latest);
//! let shell = Resource::new(ResourceKind::ShellDefault, "/bin/zsh", DesiredState::Present)
//!     .depends_on(zsh.reference());
//!
//! let doc = DesiredStateDocument::from_resources(vec![zsh, shell]);
//! let graph = graph::build(&doc)?;
//! let report = reconcile(graph, &my_provider, &ReconcileOptions::default(), &mut NoProgress)?;
//! std::process::exit(report.exit_code());
//! ```
//!
//! The crate knows nothing about package managers or processes: callers
//! plug in a [`Provider`] that probes and applies each kind of resource.

pub mod context;
pub mod error;
pub mod graph;
pub mod reconciler;
pub mod report;
pub mod types;

pub use context::{CancelToken, NoProgress, ProgressCallback, Provider};
pub use error::{GraphError, NodeError, ReconcileError};
pub use graph::TaskGraph;
pub use reconciler::{ReconcileOptions, default_concurrency, reconcile};
pub use report::{ExecutionRecord, ExecutionReport, Outcome, Summary, bounded_tail};
pub use types::{
    DesiredState, DesiredStateDocument, Fact, ParseRefError, Resource, ResourceKind, ResourceRef,
    same_remote,
};
