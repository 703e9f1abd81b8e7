//! Uniform contract over the supported package managers.
//!
//! The [`PackageManager`] trait hides each tool's command line and output
//! format, so probing and converging a package looks the same whether it
//! goes through apt, Homebrew, pip or snap.

pub mod apt;
pub mod brew;
pub mod pip;
pub mod snap;

pub use apt::Apt;
pub use brew::Brew;
pub use pip::Pip;
pub use snap::Snap;

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunOptions};
use converge::{CancelToken, DesiredState, Fact};
use std::sync::Arc;
use std::time::Duration;

/// A package manager reachable through external commands.
///
/// Every mutation must be safe to re-run. `refresh` updates the manager's
/// package catalogue and is a no-op for managers without one.
pub trait PackageManager: Send + Sync {
    /// Short name used in logs ("apt", "brew", ...)
    fn name(&self) -> &'static str;

    /// Whether mutations need administrator rights
    fn requires_elevation(&self) -> bool {
        false
    }

    /// Installed version, or `None` when the package is not installed.
    fn current_version(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>>;

    /// Newer version available for an installed package, if any.
    fn available_upgrade(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>>;

    /// Update the package catalogue.
    fn refresh(&self, cancel: &CancelToken) -> Result<()>;

    /// Install a package.
    fn install(&self, package: &str, cancel: &CancelToken) -> Result<()>;

    /// Upgrade an installed package to the newest available version.
    fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()>;

    /// Remove a package.
    fn uninstall(&self, package: &str, cancel: &CancelToken) -> Result<()>;

    /// Check if a package is installed.
    fn is_installed(&self, package: &str, cancel: &CancelToken) -> Result<bool> {
        Ok(self.current_version(package, cancel)?.is_some())
    }

    /// Check if an installed package has a newer version available.
    fn is_outdated(&self, package: &str, cancel: &CancelToken) -> Result<bool> {
        Ok(self.available_upgrade(package, cancel)?.is_some())
    }
}

/// Observe a package as a [`Fact`].
///
/// The upgrade check only runs when the desired state is `Latest`.
pub fn observe(
    manager: &dyn PackageManager,
    package: &str,
    desired: DesiredState,
    cancel: &CancelToken,
) -> Result<Fact> {
    let Some(installed) = manager.current_version(package, cancel)? else {
        return Ok(Fact::Missing);
    };
    let installed = Some(installed).filter(|v| !v.is_empty());

    if desired == DesiredState::Latest
        && let Some(available) = manager.available_upgrade(package, cancel)?
    {
        return Ok(Fact::Outdated {
            installed,
            available: Some(available),
        });
    }
    Ok(Fact::Installed { version: installed })
}

/// Runner handle and options shared by the backends.
#[derive(Clone)]
pub(crate) struct Invoker {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Invoker {
    pub(crate) fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: crate::runner::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Options for a read-only query
    pub(crate) fn query_options(&self) -> RunOptions {
        RunOptions::default().timeout(self.timeout)
    }

    /// Options for a mutation
    pub(crate) fn mutate_options(&self, elevate: bool) -> RunOptions {
        let options = RunOptions::default()
            .timeout(self.timeout)
            .retry(self.retry.clone());
        if elevate { options.elevated() } else { options }
    }

    /// Run a query and return its output whatever the exit code.
    pub(crate) fn query(&self, command: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
        self.runner.execute(command, &self.query_options(), cancel)
    }

    /// Run a command that must succeed.
    pub(crate) fn run(
        &self,
        command: &CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput> {
        self.runner.run(command, options, cancel)
    }
}
