use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use converge::ResourceKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "provision")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge this machine to a declared desired state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Probe every resource and apply what is missing
    Run(RunArgs),

    /// Print the execution order without probing anything
    Plan(PlanArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by `run` and `plan`
#[derive(Args, Clone)]
pub struct SelectArgs {
    /// Desired-state document (TOML or JSON)
    #[arg(short, long, env = "PROVISION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only converge resources of this kind (e.g. apt, brew, pip, snap, git, shell, font, theme)
    #[arg(long, value_parser = parse_kind)]
    pub only: Option<ResourceKind>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Probe only; report what would be applied
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Maximum resources converged at once (default: number of CPUs)
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Write the execution report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Timeout for each external command, in seconds
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub select: SelectArgs,
}

fn parse_kind(value: &str) -> Result<ResourceKind, String> {
    value.parse().map_err(|e: converge::ParseRefError| e.to_string())
}
