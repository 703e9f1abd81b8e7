//! Debian/Ubuntu system packages via `dpkg-query`, `apt-cache` and `apt-get`.

use super::{Invoker, PackageManager};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::runner::{CommandRunner, CommandSpec, RunOptions};
use converge::CancelToken;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static INSTALLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Installed:\s*(\S+)").expect("installed regex is valid")
});

static CANDIDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Candidate:\s*(\S+)").expect("candidate regex is valid")
});

/// apt marks "nothing here" with this placeholder
const NONE: &str = "(none)";

/// The system package manager.
#[derive(Clone)]
pub struct Apt {
    invoker: Invoker,
}

impl Apt {
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

    fn apt_get(&self, args: &[&str], cancel: &CancelToken) -> Result<()> {
        let command = CommandSpec::new("apt-get").args(args.iter().copied());
        let options: RunOptions = self
            .invoker
            .mutate_options(self.requires_elevation())
            .env("DEBIAN_FRONTEND", "noninteractive");
        let options = if is_destructive(args) {
            options
        } else {
            options.idempotent()
        };
        self.invoker.run(&command, &options, cancel)?;
        Ok(())
    }
}

fn is_destructive(args: &[&str]) -> bool {
    args.first().is_some_and(|sub| matches!(*sub, "remove" | "purge"))
}

/// Parse `dpkg-query -W -f='${Status}\t${Version}'` output.
pub(crate) fn parse_dpkg_status(stdout: &str) -> Option<String> {
    let line = stdout.lines().next()?;
    let (status, version) = line.split_once('\t')?;
    // "install ok installed"; anything else is half-installed or removed
    if status.split_whitespace().last() == Some("installed") {
        Some(version.trim().to_string())
    } else {
        None
    }
}

/// Parse `apt-cache policy <pkg>` into (installed, candidate).
pub(crate) fn parse_policy(stdout: &str) -> (Option<String>, Option<String>) {
    let capture = |re: &Regex| {
        re.captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|v| *v != NONE)
            .map(str::to_string)
    };
    (capture(&INSTALLED_RE), capture(&CANDIDATE_RE))
}

impl PackageManager for Apt {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn requires_elevation(&self) -> bool {
        true
    }

    fn current_version(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}\t${Version}", package]);
        let output = self.invoker.query(&command, cancel)?;
        // Exit 1 means dpkg has never heard of the package
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_dpkg_status(&output.stdout))
    }

    fn available_upgrade(&self, package: &str, cancel: &CancelToken) -> Result<Option<String>> {
        let command = CommandSpec::new("apt-cache").args(["policy", package]);
        let output = self.invoker.query(&command, cancel)?;
        if !output.success() {
            return Ok(None);
        }
        match parse_policy(&output.stdout) {
            (Some(installed), Some(candidate)) if installed != candidate => Ok(Some(candidate)),
            _ => Ok(None),
        }
    }

    fn refresh(&self, cancel: &CancelToken) -> Result<()> {
        self.apt_get(&["update"], cancel)
    }

    fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.apt_get(&["install", "-y", package], cancel)
    }

    fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.apt_get(&["install", "-y", "--only-upgrade", package], cancel)
    }

    fn uninstall(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.apt_get(&["remove", "-y", package], cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    const POLICY_OUTDATED: &str = "\
tmux:
  Installed: 3.3a-3
  Candidate: 3.4-1
  Version table:
     3.4-1 500
        500 http://archive.ubuntu.com/ubuntu noble/main amd64 Packages
 *** 3.3a-3 100
        100 /var/lib/dpkg/status
";

    #[test]
    fn test_parse_dpkg_status() {
        assert_eq!(
            parse_dpkg_status("install ok installed\t5.9-6ubuntu2"),
            Some("5.9-6ubuntu2".to_string())
        );
        assert_eq!(parse_dpkg_status("deinstall ok config-files\t5.9-6"), None);
        assert_eq!(parse_dpkg_status(""), None);
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(
            parse_policy(POLICY_OUTDATED),
            (Some("3.3a-3".to_string()), Some("3.4-1".to_string()))
        );
        let missing = "zsh:\n  Installed: (none)\n  Candidate: 5.9-6\n";
        assert_eq!(parse_policy(missing), (None, Some("5.9-6".to_string())));
    }

    #[test]
    fn test_current_version_not_installed() {
        let runner = Arc::new(FakeRunner::new(|_, _| {
            FakeRunner::exit(1, "dpkg-query: no packages found matching zsh")
        }));
        let apt = Apt::new(runner);
        assert_eq!(apt.current_version("zsh", &CancelToken::new()).unwrap(), None);
    }

    #[test]
    fn test_available_upgrade() {
        let runner = Arc::new(FakeRunner::new(|_, _| FakeRunner::ok(POLICY_OUTDATED)));
        let apt = Apt::new(runner.clone());
        assert_eq!(
            apt.available_upgrade("tmux", &CancelToken::new()).unwrap(),
            Some("3.4-1".to_string())
        );
        assert_eq!(runner.command_lines(), vec!["apt-cache policy tmux"]);
    }

    #[test]
    fn test_mutations_are_elevated_and_noninteractive() {
        let runner = Arc::new(FakeRunner::new(|_, opts| {
            assert!(
                opts.env
                    .iter()
                    .any(|(k, v)| k == "DEBIAN_FRONTEND" && v == "noninteractive")
            );
            FakeRunner::ok("")
        }));
        let apt = Apt::new(runner.clone());
        let cancel = CancelToken::new();
        apt.install("zsh", &cancel).unwrap();
        apt.upgrade("tmux", &cancel).unwrap();
        apt.uninstall("nano", &cancel).unwrap();

        let calls = runner.calls();
        assert_eq!(
            runner.command_lines(),
            vec![
                "apt-get install -y zsh",
                "apt-get install -y --only-upgrade tmux",
                "apt-get remove -y nano",
            ]
        );
        assert!(calls.iter().all(|c| c.elevated));
        assert!(calls[0].idempotent && calls[1].idempotent);
        assert!(!calls[2].idempotent);
    }

    #[test]
    fn test_missing_dpkg_is_surfaced() {
        let runner = Arc::new(FakeRunner::new(|cmd, _| {
            Err(crate::error::Error::CommandNotFound {
                command: cmd.program.clone(),
            })
        }));
        let apt = Apt::new(runner);
        let err = apt.current_version("zsh", &CancelToken::new()).unwrap_err();
        assert!(matches!(err, crate::error::Error::CommandNotFound { .. }));
    }
}
