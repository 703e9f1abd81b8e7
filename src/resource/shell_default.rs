//! The user's login shell

use super::Toolbox;
use converge::{CancelToken, Fact, NodeError, Provider, Resource};
use pkgkit::CommandSpec;
use std::path::Path;

pub struct ShellDefaultProvider {
    toolbox: Toolbox,
}

impl ShellDefaultProvider {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    /// Shell recorded in the account database
    fn account_shell(&self, cancel: &CancelToken) -> Result<Option<String>, NodeError> {
        let username = &self.toolbox.settings().username;
        let command = CommandSpec::new("getent").args(["passwd", username.as_str()]);
        match self.toolbox.query(command, cancel) {
            Ok(output) if output.success() => Ok(parse_passwd_shell(&output.stdout)),
            Ok(_) | Err(NodeError::ProbeUnavailable { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Seventh field of a passwd entry
fn parse_passwd_shell(entry: &str) -> Option<String> {
    let line = entry.lines().next()?;
    line.split(':')
        .nth(6)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Provider for ShellDefaultProvider {
    fn probe(&self, _resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError> {
        let shell = match self.account_shell(cancel)? {
            Some(shell) => shell,
            // No account database lookup; trust the environment
            None => self
                .toolbox
                .settings()
                .login_shell
                .clone()
                .ok_or_else(|| NodeError::ProbeUnavailable {
                    tool: "getent".into(),
                })?,
        };
        Ok(Fact::Shell { path: shell })
    }

    fn apply(&self, resource: &Resource, _fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        let shell = &resource.identifier;
        if !Path::new(shell).is_file() {
            return Err(NodeError::other(format!("{shell} does not exist")));
        }

        let username = &self.toolbox.settings().username;
        let command = CommandSpec::new("chsh").args(["-s", shell.as_str(), username.as_str()]);
        let options = self.toolbox.options().elevated().idempotent();
        self.toolbox.run(command, &options, cancel)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support;
    use converge::{DesiredState, ResourceKind};
    use pkgkit::testing::FakeRunner;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn login_shell(path: &str) -> Resource {
        Resource::new(ResourceKind::ShellDefault, path, DesiredState::Present)
    }

    #[test]
    fn test_parse_passwd_shell() {
        assert_eq!(
            parse_passwd_shell("dev:x:1000:1000:Dev,,,:/home/dev:/usr/bin/zsh\n"),
            Some("/usr/bin/zsh".to_string())
        );
        assert_eq!(parse_passwd_shell("dev:x:1000:1000::/home/dev:"), None);
        assert_eq!(parse_passwd_shell(""), None);
    }

    #[test]
    fn test_probe_reads_account_database() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|_, _| {
            FakeRunner::ok("dev:x:1000:1000::/home/dev:/usr/bin/zsh\n")
        }));
        let provider = ShellDefaultProvider::new(test_support::toolbox(runner.clone(), dir.path()));

        let resource = login_shell("/usr/bin/zsh");
        let fact = provider.probe(&resource, &CancelToken::new()).unwrap();
        assert!(fact.satisfies(&resource));
        assert_eq!(runner.command_lines(), vec!["getent passwd dev"]);
    }

    #[test]
    fn test_probe_falls_back_to_environment() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|cmd, _| {
            Err(pkgkit::Error::CommandNotFound {
                command: cmd.program.clone(),
            })
        }));
        let provider = ShellDefaultProvider::new(test_support::toolbox(runner, dir.path()));

        let fact = provider
            .probe(&login_shell("/usr/bin/zsh"), &CancelToken::new())
            .unwrap();
        assert_eq!(
            fact,
            Fact::Shell {
                path: "/bin/bash".into()
            }
        );
    }

    #[test]
    fn test_probe_without_any_source_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_support::settings(dir.path());
        settings.login_shell = None;
        let runner = Arc::new(FakeRunner::new(|_, _| FakeRunner::exit(2, "")));
        let provider = ShellDefaultProvider::new(Toolbox::new(runner, Arc::new(settings)));

        let err = provider
            .probe(&login_shell("/usr/bin/zsh"), &CancelToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::ProbeUnavailable {
                tool: "getent".into()
            }
        );
    }

    #[test]
    fn test_apply_runs_chsh_elevated() {
        let dir = TempDir::new().unwrap();
        let shell = dir.path().join("zsh");
        fs::write(&shell, "").unwrap();
        let shell = shell.to_string_lossy().to_string();

        let runner = Arc::new(FakeRunner::succeeding());
        let provider = ShellDefaultProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        provider
            .apply(
                &login_shell(&shell),
                &Fact::Shell {
                    path: "/bin/bash".into(),
                },
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(runner.command_lines(), vec![format!("chsh -s {shell} dev")]);
        assert!(runner.calls()[0].elevated);
    }

    #[test]
    fn test_apply_rejects_missing_shell() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::succeeding());
        let provider = ShellDefaultProvider::new(test_support::toolbox(runner.clone(), dir.path()));

        let missing = dir.path().join("fish").to_string_lossy().to_string();
        let err = provider
            .apply(
                &login_shell(&missing),
                &Fact::Shell {
                    path: "/bin/bash".into(),
                },
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(runner.calls().is_empty());
    }
}
