//! `provision run`: probe every resource and converge what is not satisfied

use super::{build_graph, load_document};
use crate::Context;
use crate::cli::RunArgs;
use crate::progress::ProgressReporter;
use crate::resource::{Providers, Settings};
use crate::sudo::{self, SudoContext};
use crate::ui;
use anyhow::{Context as AnyhowContext, Result};
use converge::{CancelToken, ReconcileOptions, default_concurrency, reconcile};
use pkgkit::SystemRunner;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// Exit code after an interrupt, as shells report SIGINT
pub const EXIT_CANCELLED: i32 = 130;

pub fn run(ctx: &Context, args: RunArgs) -> Result<i32> {
    let document = load_document(&args.select)?;
    let graph = build_graph(&document, &args.select)?;

    if graph.is_empty() {
        ui::warn("Nothing to provision");
        return Ok(0);
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            eprintln!("\nInterrupted; stopping running commands...");
        }
        handler_token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let settings = Settings::detect(&document.username, Duration::from_secs(args.timeout))?;
    let providers = Providers::new(Arc::new(SystemRunner::new()), settings).dry_run(args.dry_run);

    // Held until reconciliation finishes; dropping it invalidates the timestamp
    let _sudo = if args.dry_run || pkgkit::is_root() {
        None
    } else {
        let privileged = sudo::privileged_kinds(&graph, &providers);
        if privileged.is_empty() {
            None
        } else {
            Some(SudoContext::acquire(&sudo::reason(&privileged))?)
        }
    };
    let opts = ReconcileOptions {
        dry_run: args.dry_run,
        concurrency: args
            .concurrency
            .map(usize::from)
            .unwrap_or_else(default_concurrency),
        cancel: cancel.clone(),
    };
    log::info!(
        "Reconciling {} resources with concurrency {}",
        graph.len(),
        opts.concurrency
    );

    let mut progress = ProgressReporter::new(ctx.quiet);
    let report = reconcile(graph, &providers, &opts, &mut progress)?;

    if ctx.quiet {
        ui::print_summary(&report.summarize(), report.dry_run);
    } else {
        ui::print_report(&report, ctx.verbose > 0);
    }

    if let Some(path) = &args.report {
        let json = report.to_json().context("Failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        if !ctx.quiet {
            ui::dim(&format!("Report written to {}", path.display()));
        }
    }

    if cancel.is_cancelled() {
        return Ok(EXIT_CANCELLED);
    }
    Ok(report.exit_code())
}
