//! Terminal progress for a reconciliation pass.

use converge::{ExecutionRecord, ProgressCallback, ResourceRef};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;

/// Progress bar fed by the reconciler's coordinator
///
/// Shows how many resources are done and which are in flight. Per-resource
/// results are rendered afterwards from the report.
pub struct ProgressReporter {
    bar: ProgressBar,
    running: BTreeSet<ResourceRef>,
}

impl ProgressReporter {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        Self {
            bar,
            running: BTreeSet::new(),
        }
    }

    fn refresh_message(&self) {
        let names: Vec<String> = self.running.iter().map(ToString::to_string).collect();
        self.bar.set_message(ui_truncate(&names.join(", "), 48));
    }
}

fn ui_truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

impl ProgressCallback for ProgressReporter {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn on_node_start(&mut self, resource: &ResourceRef) {
        self.running.insert(resource.clone());
        self.refresh_message();
    }

    fn on_node_complete(&mut self, record: &ExecutionRecord) {
        self.running.remove(&record.resource);
        self.refresh_message();
        self.bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
