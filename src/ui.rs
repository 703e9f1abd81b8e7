use chrono::Local;
use colored::{ColoredString, Colorize};
use converge::{ExecutionRecord, ExecutionReport, NodeError, Outcome, Summary, TaskGraph};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

// ============================================================================
// Report Rendering
// ============================================================================

fn outcome_marker(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Applied => "✓".green(),
        Outcome::SkippedAlreadySatisfied => "·".dimmed(),
        Outcome::WouldApply => "~".cyan(),
        Outcome::Failed => "✗".red(),
        Outcome::SkippedDependencyFailed => "⊘".yellow(),
        Outcome::Cancelled => "⊘".dimmed(),
    }
}

/// One line per record: marker, resource, outcome, duration
pub fn record_line(record: &ExecutionRecord) -> String {
    let label = match record.outcome {
        Outcome::Failed => record.outcome.label().red().to_string(),
        Outcome::Applied => record.outcome.label().green().to_string(),
        Outcome::WouldApply => record.outcome.label().cyan().to_string(),
        _ => record.outcome.label().dimmed().to_string(),
    };
    format!(
        "{} {:<44} {} {}",
        outcome_marker(record.outcome),
        record.resource.to_string(),
        label,
        format!("({:.1}s)", record.duration.as_secs_f64()).dimmed()
    )
}

/// Print the full report, failures with their stderr tail
pub fn print_report(report: &ExecutionReport, verbose: bool) {
    header(if report.dry_run {
        "Provisioning Plan (dry run)"
    } else {
        "Provisioning Report"
    });
    dim(&format!("started {}", local_time(report)));

    for record in report.records_in_plan_order() {
        let quiet_skip = record.outcome == Outcome::SkippedAlreadySatisfied && !verbose;
        if !quiet_skip {
            println!("{}", record_line(record));
        }
        if let Some(err) = &record.error {
            print_failure(err);
        }
    }

    println!();
    print_summary(&report.summarize(), report.dry_run);
}

fn local_time(report: &ExecutionReport) -> String {
    report
        .started_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn print_failure(err: &NodeError) {
    println!("    {} {}", format!("[{}]", err.class()).red(), err);
    if let Some(tail) = err.stderr_tail() {
        for line in tail.lines() {
            println!("    {} {}", "│".dimmed(), line.dimmed());
        }
    }
}

/// Print the summary line, coloured by overall result
pub fn print_summary(summary: &Summary, dry_run: bool) {
    let line = summary.to_string();
    if summary.failed > 0 {
        error(&line);
    } else if !summary.is_success() {
        warn(&line);
    } else if dry_run && summary.would_apply > 0 {
        info(&line);
    } else {
        success(&line);
    }
}

/// Print the execution order of a graph
pub fn print_plan(graph: &TaskGraph) {
    header("Execution Order");
    for (position, resource) in graph.resources().iter().enumerate() {
        println!(
            "{} {} {}",
            format!("{:>3}.", position + 1).blue().bold(),
            resource.reference(),
            format!("({})", resource.describe_target()).dimmed()
        );
        let deps: Vec<String> = graph
            .requires(position)
            .iter()
            .map(|&d| graph.resource(d).reference().to_string())
            .collect();
        if !deps.is_empty() {
            dim(&format!("     after {}", deps.join(", ")));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
