//! Python packages via `python3 -m pip`.

use super::{Invoker, PackageManager};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::runner::{CommandRunner, CommandSpec};
use converge::CancelToken;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// One row of `pip list --outdated --format=json`
#[derive(Debug, Deserialize)]
struct OutdatedEntry {
    name: String,
    latest_version: String,
}

/// pip, driven through a Python interpreter so it always matches that interpreter.
#[derive(Clone)]
pub struct Pip {
    invoker: Invoker,
    python: String,
}

impl Pip {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            invoker: Invoker::new(runner),
            python: "python3".to_string(),
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

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(self.python.clone())
            .args(["-m", "pip"])
            .args(args.iter().copied())
    }

    fn mutate(&self, args: &[&str], idempotent: bool, cancel: &CancelToken) -> Result<()> {
        let options = self
            .invoker
            .mutate_options(self.requires_elevation())
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
        let options = if idempotent {
            options.idempotent()
        } else {
            options
        };
        self.invoker.run(&self.command(args), &options, cancel)?;
        Ok(())
    }
}

/// Package names compare case-insensitively with `-`, `_` and `.` equivalent.
pub(crate) fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '_' | '.' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Extract the `Version:` field from `pip show` output.
pub(crate) fn parse_show(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
}

/// Find `package` in `pip list --outdated --format=json` output.
pub(crate) fn parse_outdated(stdout: &str, package: &str) -> Result<Option<String>> {
    let entries: Vec<OutdatedEntry> = serde_json::from_str(stdout)?;
    let wanted = normalize(package);
    Ok(entries
        .into_iter()
        .find(|e| normalize(&e.name) == wanted)
        .map(|e| e.latest_version))
}

impl PackageManager for Pip {
    fn name(&self) -> &'static str {
        "pip"
    }

    fn current_version(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let output = self.invoker.query(&self.command(&["show", package]), cancel)?;
        if !output.success() {
            // The interpreter exists but has no pip
            if output.stderr.contains("No module named pip") {
                return Err(Error::CommandNotFound {
                    command: format!("{} -m pip", self.python),
                });
            }
            return Ok(None);
        }
        Ok(parse_show(&output.stdout).or_else(|| Some(String::new())))
    }

    fn available_upgrade(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = self.command(&["list", "--outdated", "--format=json"]);
        let output = self.invoker.query(&command, cancel)?;
        if !output.success() {
            return Err(Error::Failed {
                command: command.display(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        parse_outdated(&output.stdout, package).map_err(|e| Error::UnexpectedOutput {
            command: command.display(),
            message: e.to_string(),
        })
    }

    fn refresh(&self, _cancel: &CancelToken) -> Result<()> {
        Ok(())
    }

    fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["install", "-U", package], true, cancel)
    }

    fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["install", "-U", package], true, cancel)
    }

    fn uninstall(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(&["uninstall", "-y", package], false, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    const SHOW: &str = "\
Name: ipython
Version: 8.22.2
Summary: IPython: Productive Interactive Computing
Location: /usr/lib/python3/dist-packages
";

    const OUTDATED: &str = r#"[{"name": "Jupyter_Core", "version": "5.5.0", "latest_version": "5.7.2", "latest_filetype": "wheel"}]"#;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Jupyter_Core"), "jupyter-core");
        assert_eq!(normalize("zope.interface"), "zope-interface");
    }

    #[test]
    fn test_parse_show() {
        assert_eq!(parse_show(SHOW), Some("8.22.2".to_string()));
        assert_eq!(parse_show("Name: x\n"), None);
    }

    #[test]
    fn test_parse_outdated_matches_normalized_names() {
        assert_eq!(
            parse_outdated(OUTDATED, "jupyter-core").unwrap(),
            Some("5.7.2".to_string())
        );
        assert_eq!(parse_outdated(OUTDATED, "ipython").unwrap(), None);
        assert_eq!(parse_outdated("[]", "ipython").unwrap(), None);
    }

    #[test]
    fn test_missing_pip_module_is_unavailable() {
        let runner = Arc::new(FakeRunner::new(|_, _| {
            FakeRunner::exit(1, "/usr/bin/python3: No module named pip")
        }));
        let pip = Pip::new(runner);
        let err = pip.current_version("ipython", &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::CommandNotFound { .. }));
    }

    #[test]
    fn test_not_installed() {
        let runner = Arc::new(FakeRunner::new(|_, _| {
            FakeRunner::exit(1, "WARNING: Package(s) not found: ipython")
        }));
        let pip = Pip::new(runner);
        assert_eq!(pip.current_version("ipython", &CancelToken::new()).unwrap(), None);
    }

    #[test]
    fn test_install_uses_interpreter_module() {
        let runner = Arc::new(FakeRunner::succeeding());
        let pip = Pip::new(runner.clone()).with_python("/usr/bin/python3.12");
        pip.install("ipython", &CancelToken::new()).unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["/usr/bin/python3.12 -m pip install -U ipython"]
        );
        assert!(runner.calls()[0].idempotent);
    }
}
