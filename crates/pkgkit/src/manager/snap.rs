//! Snap packages via the `snap` CLI.

use super::{Invoker, PackageManager};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::runner::{CommandRunner, CommandSpec};
use converge::CancelToken;
use std::sync::Arc;
use std::time::Duration;

/// snapd packages. All mutations need root.
#[derive(Clone)]
pub struct Snap {
    invoker: Invoker,
}

impl Snap {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            invoker: Invoker::new(runner),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.invoker.set_timeout(timeout);
        self
    }

    /// Retry policy for idempotent mutations
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.invoker.set_retry(policy);
        self
    }

    fn mutate(&self, args: &[&str], idempotent: bool, cancel: &CancelToken) -> Result<()> {
        let command = CommandSpec::new("snap").args(args.iter().copied());
        let options = self.invoker.mutate_options(self.requires_elevation());
        let options = if idempotent {
            options.idempotent()
        } else {
            options
        };
        self.invoker.run(&command, &options, cancel)?;
        Ok(())
    }
}

/// Version column for `package` in a `snap list` / `snap refresh --list` table.
///
/// Both tables start with a header row and put name and version first.
pub(crate) fn parse_table(stdout: &str, package: &str) -> Option<String> {
    stdout.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(name), Some(version)) if name == package => Some(version.to_string()),
            _ => None,
        }
    })
}

impl PackageManager for Snap {
    fn name(&self) -> &'static str {
        "snap"
    }

    fn requires_elevation(&self) -> bool {
        true
    }

    fn current_version(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = CommandSpec::new("snap").args(["list", package]);
        let output = self.invoker.query(&command, cancel)?;
        // "error: no matching snaps installed"
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_table(&output.stdout, package))
    }

    fn available_upgrade(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = CommandSpec::new("snap").args(["refresh", "--list"]);
        let output = self.invoker.query(&command, cancel)?;
        // "All snaps up to date." goes to stderr with an empty table
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_table(&output.stdout, package))
    }

    /// snapd keeps its catalogue current on its own; `snap refresh` without
    /// arguments would upgrade every installed snap.
    fn refresh(&self, _cancel: &CancelToken) -> Result<()> {
        Ok(())
    }

    fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["install", "--classic", package], true, cancel)
    }

    fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["refresh", package], true, cancel)
    }

    fn uninstall(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["remove", package], false, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    const LIST: &str = "\
Name  Version   Rev  Tracking       Publisher   Notes
code  1.87.2    155  latest/stable  vscode**    classic
";

    const REFRESH_LIST: &str = "\
Name     Version  Rev   Size   Publisher   Notes
firefox  124.0.1  3972  265MB  mozilla**   -
";

    #[test]
    fn test_parse_table() {
        assert_eq!(parse_table(LIST, "code"), Some("1.87.2".to_string()));
        assert_eq!(parse_table(LIST, "Name"), None);
        assert_eq!(parse_table(REFRESH_LIST, "firefox"), Some("124.0.1".to_string()));
        assert_eq!(parse_table(REFRESH_LIST, "code"), None);
    }

    #[test]
    fn test_probe_and_upgrade_check() {
        let runner = Arc::new(FakeRunner::new(|cmd, _| match cmd.args[0].as_str() {
            "list" => FakeRunner::ok(LIST),
            "refresh" => FakeRunner::ok(REFRESH_LIST),
            _ => FakeRunner::exit(1, "unexpected"),
        }));
        let snap = Snap::new(runner);
        let cancel = CancelToken::new();
        assert_eq!(
            snap.current_version("code", &cancel).unwrap(),
            Some("1.87.2".to_string())
        );
        assert!(!snap.is_outdated("code", &cancel).unwrap());
        assert!(snap.is_outdated("firefox", &cancel).unwrap());
    }

    #[test]
    fn test_refresh_does_not_touch_installed_snaps() {
        let runner = Arc::new(FakeRunner::succeeding());
        let snap = Snap::new(runner.clone());
        snap.refresh(&CancelToken::new()).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_install_is_classic_and_elevated() {
        let runner = Arc::new(FakeRunner::succeeding());
        let snap = Snap::new(runner.clone());
        snap.install("code", &CancelToken::new()).unwrap();
        assert_eq!(runner.command_lines(), vec!["snap install --classic code"]);
        assert!(runner.calls()[0].elevated);
    }
}
