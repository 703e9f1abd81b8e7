//! Desktop theme cloned from a git source
//!
//! The marker file records the source the theme was installed from. A theme
//! is only satisfied while both the marker and the clone's `origin` match
//! `themeSource`; a managed clone of an old source is repointed in place.

use super::{MARKER_FILE, Toolbox};
use converge::{CancelToken, Fact, NodeError, Provider, Resource, same_remote};
use pkgkit::CommandSpec;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ThemeBundleProvider {
    toolbox: Toolbox,
}

impl ThemeBundleProvider {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn install_dir(&self, name: &str) -> PathBuf {
        self.toolbox.settings().themes_dir().join(name)
    }

    fn origin(&self, dir: &Path, cancel: &CancelToken) -> Result<Option<String>, NodeError> {
        let command = CommandSpec::new("git")
            .arg("-C")
            .arg(dir.to_string_lossy())
            .args(["remote", "get-url", "origin"]);
        let output = self.toolbox.query(command, cancel)?;
        let remote = output.stdout.trim();
        Ok((output.success() && !remote.is_empty()).then(|| remote.to_string()))
    }

    fn git(&self, dir: &str, args: &[&str], cancel: &CancelToken) -> Result<(), NodeError> {
        let command = CommandSpec::new("git").args(["-C", dir]).args(args.iter().copied());
        self.toolbox
            .run(command, &self.toolbox.options().idempotent(), cancel)
            .map(drop)
    }
}

fn recorded_source(dir: &Path) -> Option<String> {
    fs::read_to_string(dir.join(MARKER_FILE))
        .ok()
        .map(|s| s.trim().to_string())
}

impl Provider for ThemeBundleProvider {
    fn probe(&self, resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError> {
        let dir = self.install_dir(&resource.identifier);
        let (Some(recorded), Some(source)) = (recorded_source(&dir), resource.source.as_deref())
        else {
            return Ok(Fact::Missing);
        };
        if recorded != source || !dir.join(".git").exists() {
            return Ok(Fact::Missing);
        }
        match self.origin(&dir, cancel)? {
            Some(origin) if same_remote(&origin, source) => Ok(Fact::Installed { version: None }),
            _ => Ok(Fact::Missing),
        }
    }

    fn apply(&self, resource: &Resource, _fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        let name = &resource.identifier;
        let Some(source) = resource.source.as_deref() else {
            return Err(NodeError::other(format!("theme {name} has no source")));
        };
        let dir = self.install_dir(name);
        let dir_arg = dir.to_string_lossy().to_string();
        let options = self.toolbox.options().idempotent();

        if dir.join(".git").exists() {
            let origin = self.origin(&dir, cancel)?;
            match origin {
                Some(origin) if same_remote(&origin, source) => {
                    self.git(&dir_arg, &["pull", "--ff-only"], cancel)?;
                }
                // Installed by us from an older source; shallow history cannot
                // be fast-forwarded across remotes
                _ if recorded_source(&dir).is_some() => {
                    self.git(&dir_arg, &["remote", "set-url", "origin", source], cancel)?;
                    self.git(&dir_arg, &["fetch", "--depth", "1", "origin"], cancel)?;
                    self.git(&dir_arg, &["reset", "--hard", "FETCH_HEAD"], cancel)?;
                }
                other => {
                    return Err(NodeError::other(format!(
                        "{} is a clone of {}, not {source}; leaving it untouched",
                        dir.display(),
                        other.as_deref().unwrap_or("an unknown remote")
                    )));
                }
            }
        } else if !dir.exists() {
            if let Some(parent) = dir.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    NodeError::other(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            let clone = CommandSpec::new("git")
                .args(["clone", "--depth", "1", source, dir_arg.as_str()]);
            self.toolbox.run(clone, &options, cancel)?;
        } else {
            return Err(NodeError::other(format!(
                "{} exists and is not a git clone; leaving it untouched",
                dir.display()
            )));
        }

        let marker = dir.join(MARKER_FILE);
        fs::write(&marker, format!("{source}\n"))
            .map_err(|e| NodeError::other(format!("cannot write {}: {e}", marker.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support;
    use converge::{DesiredState, ResourceKind};
    use pkgkit::testing::FakeRunner;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const SOURCE: &str = "https://github.com/vinceliuice/Orchis-theme.git";

    fn theme() -> Resource {
        Resource::new(ResourceKind::ThemeBundle, "Orchis", DesiredState::Present).with_source(SOURCE)
    }

    /// Tracks `origin` the way git would: clone and set-url change it,
    /// get-url reports it
    fn fake_git(origin: Option<&str>) -> FakeRunner {
        let origin = Mutex::new(origin.map(String::from));
        FakeRunner::new(move |cmd, _| {
            let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
            let mut origin = origin.lock().unwrap();
            match args.as_slice() {
                ["clone", .., src, dest] => {
                    fs::create_dir_all(Path::new(dest).join(".git")).unwrap();
                    *origin = Some((*src).to_string());
                    FakeRunner::ok("")
                }
                ["-C", _, "remote", "get-url", "origin"] => match origin.as_deref() {
                    Some(url) => FakeRunner::ok(&format!("{url}\n")),
                    None => FakeRunner::exit(2, "error: No such remote 'origin'"),
                },
                ["-C", _, "remote", "set-url", "origin", url] => {
                    *origin = Some((*url).to_string());
                    FakeRunner::ok("")
                }
                _ => FakeRunner::ok(""),
            }
        })
    }

    #[test]
    fn test_clone_then_satisfied() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(fake_git(None));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let cancel = CancelToken::new();
        let resource = theme();

        assert_eq!(provider.probe(&resource, &cancel).unwrap(), Fact::Missing);
        provider.apply(&resource, &Fact::Missing, &cancel).unwrap();

        let install = dir.path().join("themes/Orchis");
        assert_eq!(
            runner.command_lines(),
            vec![format!("git clone --depth 1 {SOURCE} {}", install.display())]
        );
        assert!(provider.probe(&resource, &cancel).unwrap().satisfies(&resource));
    }

    #[test]
    fn test_changed_source_repoints_clone() {
        const OLD: &str = "https://example.com/old.git";
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("themes/Orchis");
        fs::create_dir_all(install.join(".git")).unwrap();
        fs::write(install.join(MARKER_FILE), format!("{OLD}\n")).unwrap();

        let runner = Arc::new(fake_git(Some(OLD)));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let cancel = CancelToken::new();
        let resource = theme();

        assert_eq!(provider.probe(&resource, &cancel).unwrap(), Fact::Missing);
        provider.apply(&resource, &Fact::Missing, &cancel).unwrap();

        let git = format!("git -C {}", install.display());
        assert!(runner.ran(&format!("{git} remote set-url origin {SOURCE}")));
        assert!(runner.ran(&format!("{git} fetch --depth 1 origin")));
        assert!(runner.ran(&format!("{git} reset --hard FETCH_HEAD")));
        assert!(!runner.ran(&format!("{git} pull")));
        assert!(provider.probe(&resource, &cancel).unwrap().satisfies(&resource));
    }

    #[test]
    fn test_marker_alone_does_not_satisfy() {
        const OLD: &str = "https://example.com/old.git";
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("themes/Orchis");
        fs::create_dir_all(install.join(".git")).unwrap();
        // Marker rewritten by hand while the clone still tracks the old remote
        fs::write(install.join(MARKER_FILE), format!("{SOURCE}\n")).unwrap();

        let runner = Arc::new(fake_git(Some(OLD)));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner, dir.path()));
        assert_eq!(
            provider.probe(&theme(), &CancelToken::new()).unwrap(),
            Fact::Missing
        );
    }

    #[test]
    fn test_same_source_fast_forwards() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("themes/Orchis");
        fs::create_dir_all(install.join(".git")).unwrap();

        let runner = Arc::new(fake_git(Some(SOURCE)));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let cancel = CancelToken::new();
        provider.apply(&theme(), &Fact::Missing, &cancel).unwrap();

        assert!(runner.command_lines().last().unwrap().ends_with("pull --ff-only"));
        assert!(!runner.ran(&format!("git -C {} remote set-url", install.display())));
        assert!(provider.probe(&theme(), &cancel).unwrap().satisfies(&theme()));
    }

    #[test]
    fn test_unmanaged_clone_of_other_remote_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("themes/Orchis");
        fs::create_dir_all(install.join(".git")).unwrap();

        let runner = Arc::new(fake_git(Some("https://example.com/fork.git")));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let err = provider
            .apply(&theme(), &Fact::Missing, &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("fork.git"));
        assert_eq!(runner.calls().len(), 1);
        assert!(!install.join(MARKER_FILE).exists());
    }

    #[test]
    fn test_foreign_directory_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("themes/Orchis");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("index.theme"), "[Desktop Entry]").unwrap();

        let runner = Arc::new(fake_git(None));
        let provider = ThemeBundleProvider::new(test_support::toolbox(runner.clone(), dir.path()));
        let err = provider
            .apply(&theme(), &Fact::Missing, &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("not a git clone"));
        assert!(runner.calls().is_empty());
        assert!(!install.join(MARKER_FILE).exists());
    }
}
