//! Probe and apply adapters for every resource kind
//!
//! Each kind has its own [`Provider`] implementation. [`Providers`]
//! dispatches on the resource kind so the reconciler sees a single provider.
//! All external commands go through the shared [`CommandRunner`].

pub mod font_bundle;
pub mod git_repo;
pub mod package;
pub mod shell_default;
pub mod theme_bundle;

pub use font_bundle::FontBundleProvider;
pub use git_repo::GitRepoProvider;
pub use package::PackageProvider;
pub use shell_default::ShellDefaultProvider;
pub use theme_bundle::ThemeBundleProvider;

use anyhow::{Context, Result};
use converge::{CancelToken, Fact, NodeError, Provider, Resource, ResourceKind};
use pkgkit::{CommandOutput, CommandRunner, CommandSpec, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where Nerd Fonts release archives are downloaded from
pub const NERD_FONTS_RELEASES: &str =
    "https://github.com/ryanoasis/nerd-fonts/releases/latest/download";

/// Marker written into font and theme directories once installed
pub const MARKER_FILE: &str = ".provision";

/// Machine facts and knobs shared by the adapters
#[derive(Debug, Clone)]
pub struct Settings {
    /// Account whose login shell is managed
    pub username: String,
    /// Base for fonts and themes, normally `~/.local/share`
    pub data_dir: PathBuf,
    /// `$SHELL` at startup; used when `getent` cannot answer
    pub login_shell: Option<String>,
    /// Per-command timeout
    pub timeout: Duration,
    pub font_base_url: String,
}

impl Settings {
    /// Settings for the current machine
    pub fn detect(username: &str, timeout: Duration) -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self {
            username: username.to_string(),
            data_dir: home.join(".local").join("share"),
            login_shell: std::env::var("SHELL").ok().filter(|s| !s.is_empty()),
            timeout,
            font_base_url: NERD_FONTS_RELEASES.to_string(),
        })
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.data_dir.join("fonts").join("NerdFonts")
    }

    pub fn themes_dir(&self) -> PathBuf {
        self.data_dir.join("themes")
    }
}

/// Runner plus settings, shared by the non-package adapters
#[derive(Clone)]
pub struct Toolbox {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<Settings>,
}

impl Toolbox {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<Settings>) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> RunOptions {
        RunOptions::default().timeout(self.settings.timeout)
    }

    /// Run a read-only command; any exit code is returned as output
    pub fn query(&self, command: CommandSpec, cancel: &CancelToken) -> Result<CommandOutput, NodeError> {
        Ok(self.runner.execute(&command, &self.options(), cancel)?)
    }

    /// Run a command that must succeed
    pub fn run(
        &self,
        command: CommandSpec,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, NodeError> {
        Ok(self.runner.run(&command, options, cancel)?)
    }
}

/// Dispatches each resource to the adapter for its kind
pub struct Providers {
    packages: PackageProvider,
    git: GitRepoProvider,
    shell: ShellDefaultProvider,
    fonts: FontBundleProvider,
    themes: ThemeBundleProvider,
}

impl Providers {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let toolbox = Toolbox::new(Arc::clone(&runner), Arc::clone(&settings));
        Self {
            packages: PackageProvider::system(runner, settings.timeout),
            git: GitRepoProvider::new(toolbox.clone()),
            shell: ShellDefaultProvider::new(toolbox.clone()),
            fonts: FontBundleProvider::new(toolbox.clone()),
            themes: ThemeBundleProvider::new(toolbox),
        }
    }

    /// Probe only: package catalogues are not refreshed.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.packages = self.packages.dry_run(dry_run);
        self
    }

    /// Whether converging resources of `kind` runs commands as root
    pub fn requires_elevation(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::SystemPackage
            | ResourceKind::BrewPackage
            | ResourceKind::PipPackage
            | ResourceKind::SnapPackage => self.packages.requires_elevation(kind),
            // chsh for another account
            ResourceKind::ShellDefault => true,
            ResourceKind::GitRepo | ResourceKind::FontBundle | ResourceKind::ThemeBundle => false,
        }
    }

    fn for_kind(&self, kind: ResourceKind) -> &dyn Provider {
        match kind {
            ResourceKind::SystemPackage
            | ResourceKind::BrewPackage
            | ResourceKind::PipPackage
            | ResourceKind::SnapPackage => &self.packages,
            ResourceKind::GitRepo => &self.git,
            ResourceKind::ShellDefault => &self.shell,
            ResourceKind::FontBundle => &self.fonts,
            ResourceKind::ThemeBundle => &self.themes,
        }
    }
}

impl Provider for Providers {
    fn probe(&self, resource: &Resource, cancel: &CancelToken) -> Result<Fact, NodeError> {
        let fact = self.for_kind(resource.kind).probe(resource, cancel)?;
        log::debug!("{}: {}", resource.reference(), fact);
        Ok(fact)
    }

    fn apply(&self, resource: &Resource, fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        log::info!("{}: {} -> {}", resource.reference(), fact, resource.describe_target());
        self.for_kind(resource.kind).apply(resource, fact, cancel)
    }
}
