//! Git clones at a fixed path
//!
//! A clone is only ever created, never updated or replaced. A path that
//! already holds something else is reported and left alone.

use super::Toolbox;
use converge::{CancelToken, Fact, NodeError, Provider, Resource};
use pkgkit::CommandSpec;
use std::fs;
use std::path::Path;

pub struct GitRepoProvider {
    toolbox: Toolbox,
}

impl GitRepoProvider {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn origin(&self, path: &Path, cancel: &CancelToken) -> Result<Option<String>, NodeError> {
        let command = CommandSpec::new("git")
            .arg("-C")
            .arg(path.to_string_lossy())
            .args(["remote", "get-url", "origin"]);
        let output = self.toolbox.query(command, cancel)?;
        let remote = output.stdout.trim();
        Ok((output.success() && !remote.is_empty()).then(|| remote.to_string()))
    }
}

fn is_empty_dir(path: &Path) -> Result<bool, NodeError> {
    let mut entries = fs::read_dir(path)
        .map_err(|e| NodeError::other(format!("cannot read {}: {e}", path.display())))?;
    Ok(entries.next().is_none())
}

impl Provider for GitRepoProvider {
    fn probe(&self, resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError> {
        let path = Path::new(&resource.identifier);
        if !path.exists() {
            return Ok(Fact::Missing);
        }
        if !path.is_dir() {
            return Ok(Fact::Occupied {
                detail: "a file is in the way".into(),
            });
        }
        if let Some(remote) = self.origin(path, cancel)? {
            return Ok(Fact::Repository { remote });
        }
        if is_empty_dir(path)? {
            return Ok(Fact::Missing);
        }
        Ok(Fact::Occupied {
            detail: "directory is not a git clone".into(),
        })
    }

    fn apply(&self, resource: &Resource, fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        let path = Path::new(&resource.identifier);
        let Some(url) = resource.source.as_deref() else {
            return Err(NodeError::other("no clone URL declared"));
        };

        match fact {
            Fact::Missing => {}
            Fact::Repository { remote } => {
                return Err(NodeError::other(format!(
                    "{} is a clone of {remote}, not {url}; leaving it untouched",
                    path.display()
                )));
            }
            other => {
                return Err(NodeError::other(format!(
                    "{} is {other}; leaving it untouched",
                    path.display()
                )));
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| NodeError::other(format!("cannot create {}: {e}", parent.display())))?;
        }

        let command = CommandSpec::new("git")
            .arg("clone")
            .arg(url)
            .arg(path.to_string_lossy());
        self.toolbox
            .run(command, &self.toolbox.options().idempotent(), cancel)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support;
    use converge::{DesiredState, ResourceKind};
    use pkgkit::testing::FakeRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    const URL: &str = "https://github.com/dev/dotfiles.git";

    fn repo(path: &Path) -> Resource {
        Resource::new(
            ResourceKind::GitRepo,
            path.to_string_lossy(),
            DesiredState::Present,
        )
        .with_source(URL)
    }

    #[test]
    fn test_probe_missing_path() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::succeeding());
        let provider = GitRepoProvider::new(test_support::toolbox(runner.clone(), dir.path()));

        let fact = provider
            .probe(&repo(&dir.path().join("dotfiles")), &CancelToken::new())
            .unwrap();
        assert_eq!(fact, Fact::Missing);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_probe_existing_clone_reports_origin() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|_, _| FakeRunner::ok(&format!("{URL}\n"))));
        let provider = GitRepoProvider::new(test_support::toolbox(runner.clone(), dir.path()));

        let resource = repo(dir.path());
        let fact = provider.probe(&resource, &CancelToken::new()).unwrap();
        assert_eq!(fact, Fact::Repository { remote: URL.into() });
        assert!(fact.satisfies(&resource));
        assert!(runner.ran("git -C"));
    }

    #[test]
    fn test_probe_occupied_paths() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|_, _| {
            FakeRunner::exit(128, "fatal: not a git repository")
        }));
        let provider = GitRepoProvider::new(test_support::toolbox(runner, dir.path()));
        let cancel = CancelToken::new();

        let file = dir.path().join("notes.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            provider.probe(&repo(&file), &cancel).unwrap(),
            Fact::Occupied { .. }
        ));

        let populated = dir.path().join("populated");
        fs::create_dir(&populated).unwrap();
        fs::write(populated.join("README"), "x").unwrap();
        assert!(matches!(
            provider.probe(&repo(&populated), &cancel).unwrap(),
            Fact::Occupied { .. }
        ));

        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        assert_eq!(provider.probe(&repo(&empty), &cancel).unwrap(), Fact::Missing);
    }

    #[test]
    fn test_apply_clones_into_new_parent() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::succeeding());
        let provider = GitRepoProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let path = dir.path().join("src").join("dotfiles");

        provider
            .apply(&repo(&path), &Fact::Missing, &CancelToken::new())
            .unwrap();

        assert!(dir.path().join("src").is_dir());
        assert_eq!(
            runner.command_lines(),
            vec![format!("git clone {URL} {}", path.display())]
        );
        assert!(runner.calls()[0].idempotent);
        assert!(!runner.calls()[0].elevated);
    }

    #[test]
    fn test_apply_refuses_foreign_clone() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::succeeding());
        let provider = GitRepoProvider::new(test_support::toolbox(runner.clone(), dir.path()));

        let fact = Fact::Repository {
            remote: "https://example.com/other.git".into(),
        };
        let err = provider
            .apply(&repo(dir.path()), &fact, &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("leaving it untouched"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_missing_git_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(|cmd, _| {
            Err(pkgkit::Error::CommandNotFound {
                command: cmd.program.clone(),
            })
        }));
        let provider = GitRepoProvider::new(test_support::toolbox(runner, dir.path()));
        let err = provider
            .probe(&repo(dir.path()), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, NodeError::ProbeUnavailable { tool: "git".into() });
    }
}
