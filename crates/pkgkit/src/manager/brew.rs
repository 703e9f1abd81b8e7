//! Homebrew formulae and casks via the `brew` CLI.

use super::{Invoker, PackageManager};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::runner::{CommandRunner, CommandSpec};
use converge::CancelToken;
use std::sync::Arc;
use std::time::Duration;

/// Homebrew, on macOS or Linux.
#[derive(Clone)]
pub struct Brew {
    invoker: Invoker,
    program: String,
}

impl Brew {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            invoker: Invoker::new(runner),
            program: "brew".to_string(),
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

    /// Use a specific `brew` executable (e.g. `/home/linuxbrew/.linuxbrew/bin/brew`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(self.program.clone()).args(args.iter().copied())
    }

    fn mutate(&self, args: &[&str], idempotent: bool, cancel: &CancelToken) -> Result<()> {
        // The catalogue is refreshed explicitly, once per run
        let options = self
            .invoker
            .mutate_options(self.requires_elevation())
            .env("HOMEBREW_NO_AUTO_UPDATE", "1")
            .env("HOMEBREW_NO_ENV_HINTS", "1");
        let options = if idempotent {
            options.idempotent()
        } else {
            options
        };
        self.invoker.run(&self.command(args), &options, cancel)?;
        Ok(())
    }
}

/// Parse `brew list --versions <name>`: "ripgrep 14.1.0 13.0.0".
///
/// Several kegs may be installed; the last one listed is reported.
pub(crate) fn parse_list_versions(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    fields.next()?;
    Some(fields.last().unwrap_or_default().to_string())
}

/// Parse `brew outdated --json=v2 <name>` into the newest available version.
pub(crate) fn parse_outdated_json(stdout: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(stdout)?;
    let entries = ["formulae", "casks"]
        .iter()
        .filter_map(|key| json[*key].as_array())
        .flatten();

    for entry in entries {
        if let Some(version) = entry["current_version"].as_str() {
            return Ok(Some(version.to_string()));
        }
    }
    Ok(None)
}

impl PackageManager for Brew {
    fn name(&self) -> &'static str {
        "brew"
    }

    fn current_version(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let output = self
            .invoker
            .query(&self.command(&["list", "--versions", package]), cancel)?;
        // Exit 1 with no output when the package is not installed
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_list_versions(&output.stdout))
    }

    fn available_upgrade(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = self.command(&["outdated", "--json=v2", package]);
        let output = self.invoker.query(&command, cancel)?;
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }
        parse_outdated_json(&output.stdout).map_err(|e| Error::UnexpectedOutput {
            command: command.display(),
            message: e.to_string(),
        })
    }

    fn refresh(&self, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["update"], true, cancel)
    }

    fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["install", package], true, cancel)
    }

    fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["upgrade", package], true, cancel)
    }

    fn uninstall(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["uninstall", package], false, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    const OUTDATED_JSON: &str = r#"{
  "formulae": [
    {
      "name": "ripgrep",
      "installed_versions": ["13.0.0"],
      "current_version": "14.1.0",
      "pinned": false,
      "pinned_version": null
    }
  ],
  "casks": []
}"#;

    #[test]
    fn test_parse_list_versions() {
        assert_eq!(
            parse_list_versions("ripgrep 14.1.0\n"),
            Some("14.1.0".to_string())
        );
        assert_eq!(
            parse_list_versions("python@3.12 3.12.1 3.12.2"),
            Some("3.12.2".to_string())
        );
        assert_eq!(parse_list_versions(""), None);
    }

    #[test]
    fn test_parse_outdated_json() {
        assert_eq!(
            parse_outdated_json(OUTDATED_JSON).unwrap(),
            Some("14.1.0".to_string())
        );
        assert_eq!(
            parse_outdated_json(r#"{"formulae":[],"casks":[]}"#).unwrap(),
            None
        );
        assert!(parse_outdated_json("not json").is_err());
    }

    #[test]
    fn test_not_installed() {
        let runner = Arc::new(FakeRunner::new(|_, _| FakeRunner::exit(1, "")));
        let brew = Brew::new(runner);
        assert!(!brew.is_installed("fd", &CancelToken::new()).unwrap());
    }

    #[test]
    fn test_outdated_exit_code_is_not_an_error() {
        // `brew outdated` exits 1 when something is outdated
        let runner = Arc::new(FakeRunner::new(|_, _| {
            Ok(crate::runner::CommandOutput {
                exit_code: 1,
                stdout: OUTDATED_JSON.to_string(),
                ..Default::default()
            })
        }));
        let brew = Brew::new(runner);
        assert!(brew.is_outdated("ripgrep", &CancelToken::new()).unwrap());
    }

    #[test]
    fn test_mutations_skip_auto_update_and_sudo() {
        let runner = Arc::new(FakeRunner::new(|_, opts| {
            assert!(opts.env.iter().any(|(k, _)| k == "HOMEBREW_NO_AUTO_UPDATE"));
            FakeRunner::ok("")
        }));
        let brew = Brew::new(runner.clone()).with_program("/opt/homebrew/bin/brew");
        let cancel = CancelToken::new();
        brew.refresh(&cancel).unwrap();
        brew.install("ripgrep", &cancel).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "/opt/homebrew/bin/brew update",
                "/opt/homebrew/bin/brew install ripgrep"
            ]
        );
        assert!(runner.calls().iter().all(|c| !c.elevated && c.idempotent));
        assert!(!brew.requires_elevation());
    }
}
