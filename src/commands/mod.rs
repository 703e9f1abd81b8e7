//! Subcommand implementations

pub mod plan;
pub mod run;

use crate::cli::SelectArgs;
use crate::config;
use anyhow::{Context as AnyhowContext, Result};
use converge::{DesiredStateDocument, TaskGraph, graph};

/// Load the desired-state document named on the command line, or the default one
pub fn load_document(select: &SelectArgs) -> Result<DesiredStateDocument> {
    let path = match &select.config {
        Some(path) => path.clone(),
        None => config::default_path()?,
    };
    log::debug!("Loading desired state from {}", path.display());
    let document = config::load(&path)?;
    Ok(document)
}

/// Build the task graph and apply `--only`
pub fn build_graph(document: &DesiredStateDocument, select: &SelectArgs) -> Result<TaskGraph> {
    let graph = graph::build(document).context("Invalid dependency graph")?;
    Ok(match select.only {
        Some(kind) => {
            let filtered = graph.retain(|r| r.kind == kind);
            log::info!("Only converging {kind}: {} resources", filtered.len());
            filtered
        }
        None => graph,
    })
}
