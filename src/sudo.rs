//! Scoped sudo session
//!
//! Sudo is never requested for the whole process. Instead:
//! 1. The graph is inspected for kinds whose providers mutate as root
//! 2. Credentials are validated once, before reconciliation starts
//! 3. A keepalive refreshes the timestamp while workers run `sudo -n`
//! 4. The timestamp is invalidated when the session is dropped

use crate::resource::Providers;
use anyhow::{Context, Result, bail};
use converge::{ResourceKind, TaskGraph};
use std::collections::BTreeSet;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// sudo's default timestamp lifetime is 5 minutes; refresh well before that
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const KEEPALIVE_TICK: Duration = Duration::from_millis(250);

/// Kinds in `graph` whose changes need root, in kind order
pub fn privileged_kinds(graph: &TaskGraph, providers: &Providers) -> BTreeSet<ResourceKind> {
    graph
        .resources()
        .iter()
        .map(|r| r.kind)
        .filter(|k| providers.requires_elevation(*k))
        .collect()
}

/// Human-readable reason shown before the password prompt
pub fn reason(kinds: &BTreeSet<ResourceKind>) -> String {
    let names: Vec<&str> = kinds
        .iter()
        .map(|k| match k {
            ResourceKind::SystemPackage => "apt packages",
            ResourceKind::SnapPackage => "snap packages",
            ResourceKind::ShellDefault => "the login shell",
            other => other.as_str(),
        })
        .collect();
    format!("changing {}", names.join(", "))
}

/// Scoped sudo session - keeps credentials fresh, invalidates on drop
pub struct SudoContext {
    stop: Arc<AtomicBool>,
    keepalive: Option<JoinHandle<()>>,
}

impl SudoContext {
    /// Acquire sudo privileges with a reason shown to the user.
    ///
    /// Cached credentials are reused without prompting.
    pub fn acquire(reason: &str) -> Result<Self> {
        if !Self::is_valid() {
            eprintln!();
            eprintln!("  Sudo required: {}", reason);
            eprintln!();

            // Validate sudo (will prompt for password)
            let status = Command::new("sudo")
                .args(["-v"])
                .status()
                .context("Failed to execute sudo")?;

            if !status.success() {
                bail!("Failed to acquire sudo privileges");
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let keepalive = spawn_keepalive(Arc::clone(&stop))?;
        Ok(Self {
            stop,
            keepalive: Some(keepalive),
        })
    }

    /// Check if sudo is currently valid (without prompting)
    pub fn is_valid() -> bool {
        Command::new("sudo")
            .args(["-n", "true"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

fn spawn_keepalive(stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sudo-keepalive".into())
        .spawn(move || {
            let mut waited = Duration::ZERO;
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(KEEPALIVE_TICK);
                waited += KEEPALIVE_TICK;
                if waited >= KEEPALIVE_INTERVAL {
                    waited = Duration::ZERO;
                    let refreshed = Command::new("sudo")
                        .args(["-n", "-v"])
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .map(|s| s.success())
                        .unwrap_or(false);
                    if !refreshed {
                        log::warn!("could not refresh sudo credentials");
                    }
                }
            }
        })
        .context("Failed to start sudo keepalive")
}

impl Drop for SudoContext {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.keepalive.take() {
            let _ = handle.join();
        }
        // Invalidate sudo timestamp to release privileges
        let _ = Command::new("sudo").args(["-k"]).status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support;
    use converge::{DesiredState, DesiredStateDocument, Resource, graph};
    use pkgkit::testing::FakeRunner;
    use tempfile::TempDir;

    fn providers(dir: &TempDir) -> Providers {
        Providers::new(
            Arc::new(FakeRunner::succeeding()),
            test_support::settings(dir.path()),
        )
    }

    #[test]
    fn test_elevation_follows_managers() {
        let dir = TempDir::new().unwrap();
        let providers = providers(&dir);
        assert!(providers.requires_elevation(ResourceKind::SystemPackage));
        assert!(providers.requires_elevation(ResourceKind::SnapPackage));
        assert!(providers.requires_elevation(ResourceKind::ShellDefault));
        assert!(!providers.requires_elevation(ResourceKind::BrewPackage));
        assert!(!providers.requires_elevation(ResourceKind::PipPackage));
        assert!(!providers.requires_elevation(ResourceKind::FontBundle));
    }

    #[test]
    fn test_privileged_kinds_and_reason() {
        let doc = DesiredStateDocument::from_resources(vec![
            Resource::new(ResourceKind::BrewPackage, "ripgrep", DesiredState::Latest),
            Resource::new(ResourceKind::SystemPackage, "zsh", DesiredState::Latest),
            Resource::new(ResourceKind::ShellDefault, "/bin/zsh", DesiredState::Present),
        ]);
        let graph = graph::build(&doc).unwrap();
        let dir = TempDir::new().unwrap();
        let kinds = privileged_kinds(&graph, &providers(&dir));
        assert_eq!(
            kinds.iter().copied().collect::<Vec<_>>(),
            vec![ResourceKind::SystemPackage, ResourceKind::ShellDefault]
        );
        assert_eq!(reason(&kinds), "changing apt packages, the login shell");
    }

    #[test]
    fn test_no_privileged_kinds() {
        let doc = DesiredStateDocument::from_resources(vec![Resource::new(
            ResourceKind::PipPackage,
            "ipython",
            DesiredState::Latest,
        )]);
        let graph = graph::build(&doc).unwrap();
        let dir = TempDir::new().unwrap();
        assert!(privileged_kinds(&graph, &providers(&dir)).is_empty());
    }
}
