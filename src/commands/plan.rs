//! `provision plan`: show the execution order without touching the machine

use super::{build_graph, load_document};
use crate::Context;
use crate::cli::PlanArgs;
use crate::resource::{Providers, Settings};
use crate::ui;
use anyhow::Result;
use pkgkit::SystemRunner;
use std::sync::Arc;
use std::time::Duration;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<i32> {
    let document = load_document(&args.select)?;
    let graph = build_graph(&document, &args.select)?;

    if graph.is_empty() {
        ui::warn("Nothing to provision");
        return Ok(0);
    }

    ui::print_plan(&graph);
    if !ctx.quiet {
        // Never probed or applied; only asked which kinds need root
        let settings = Settings::detect(&document.username, Duration::ZERO)?;
        let providers = Providers::new(Arc::new(SystemRunner::new()), settings).dry_run(true);
        let privileged = crate::sudo::privileged_kinds(&graph, &providers);
        if !privileged.is_empty() {
            println!();
            ui::dim(&format!("sudo will be requested for {}", crate::sudo::reason(&privileged)));
        }
    }
    Ok(0)
}
