//! Core types for dependency-ordered provisioning

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Category of a managed resource
///
/// The declaration order is significant: it is the first component of the
/// `(kind, identifier)` tie-break used when ordering the graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SystemPackage,
    BrewPackage,
    PipPackage,
    SnapPackage,
    GitRepo,
    ShellDefault,
    FontBundle,
    ThemeBundle,
}

impl ResourceKind {
    pub const ALL: [Self; 8] = [
        Self::SystemPackage,
        Self::BrewPackage,
        Self::PipPackage,
        Self::SnapPackage,
        Self::GitRepo,
        Self::ShellDefault,
        Self::FontBundle,
        Self::ThemeBundle,
    ];

    /// Stable snake_case name, used in references and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemPackage => "system_package",
            Self::BrewPackage => "brew_package",
            Self::PipPackage => "pip_package",
            Self::SnapPackage => "snap_package",
            Self::GitRepo => "git_repo",
            Self::ShellDefault => "shell_default",
            Self::FontBundle => "font_bundle",
            Self::ThemeBundle => "theme_bundle",
        }
    }

    /// Whether resources of this kind are handled by a package manager
    pub fn is_package(&self) -> bool {
        matches!(
            self,
            Self::SystemPackage | Self::BrewPackage | Self::PipPackage | Self::SnapPackage
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind or reference string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRefError {
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
    #[error("invalid resource reference '{0}' (expected kind:identifier)")]
    Malformed(String),
}

impl FromStr for ResourceKind {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        // Short aliases mirror the manager names used on the command line
        match normalized.as_str() {
            "apt" | "system" => return Ok(Self::SystemPackage),
            "brew" | "homebrew" => return Ok(Self::BrewPackage),
            "pip" => return Ok(Self::PipPackage),
            "snap" => return Ok(Self::SnapPackage),
            "git" => return Ok(Self::GitRepo),
            "shell" => return Ok(Self::ShellDefault),
            "font" | "fonts" => return Ok(Self::FontBundle),
            "theme" => return Ok(Self::ThemeBundle),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ParseRefError::UnknownKind(s.to_string()))
    }
}

/// Target state for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    /// Installed at any version
    #[default]
    Present,
    /// Installed and not outdated
    Latest,
    /// Not installed
    Absent,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Latest => f.write_str("latest"),
            Self::Absent => f.write_str("absent"),
        }
    }
}

/// Reference to a resource by kind and identifier
///
/// Ordering is `(kind, identifier)`, which is the graph tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub identifier: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}

impl FromStr for ResourceRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split at the first ':' only; identifiers may be paths or URLs
        let (kind, identifier) = s
            .split_once(':')
            .ok_or_else(|| ParseRefError::Malformed(s.to_string()))?;
        if identifier.is_empty() {
            return Err(ParseRefError::Malformed(s.to_string()));
        }
        Ok(Self::new(kind.parse()?, identifier))
    }
}

/// A declared unit of desired machine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    /// Unique within `kind`
    pub identifier: String,
    pub depends_on: BTreeSet<ResourceRef>,
    pub desired_state: DesiredState,
    /// Remote location for kinds fetched from a URL (git checkouts, themes)
    pub source: Option<String>,
}

impl Resource {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>, desired: DesiredState) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            depends_on: BTreeSet::new(),
            desired_state: desired,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn depends_on(mut self, dependency: ResourceRef) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind, self.identifier.clone())
    }

    /// Human-readable description of the target state
    pub fn describe_target(&self) -> String {
        match (self.kind, self.desired_state) {
            (_, DesiredState::Absent) => format!("{} absent", self.identifier),
            (ResourceKind::ShellDefault, _) => format!("login shell {}", self.identifier),
            (ResourceKind::GitRepo, _) => format!(
                "{} checked out from {}",
                self.identifier,
                self.source.as_deref().unwrap_or("?")
            ),
            (_, DesiredState::Latest) => format!("{} installed at latest version", self.identifier),
            (_, DesiredState::Present) => format!("{} installed", self.identifier),
        }
    }
}

/// Observed current state of one resource
///
/// Facts are re-probed on every run and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Fact {
    /// Nothing is installed or present at the expected location
    Missing,
    /// Installed, optionally at a known version
    Installed { version: Option<String> },
    /// Installed, but a newer version is available
    Outdated {
        installed: Option<String>,
        available: Option<String>,
    },
    /// Current login shell
    Shell { path: String },
    /// A git repository with the given `origin` remote
    Repository { remote: String },
    /// The location is occupied by something unmanaged
    Occupied { detail: String },
}

impl Fact {
    /// Check whether this observation already matches the resource's target
    pub fn satisfies(&self, resource: &Resource) -> bool {
        if resource.desired_state == DesiredState::Absent {
            return matches!(self, Self::Missing);
        }

        match resource.kind {
            ResourceKind::ShellDefault => {
                matches!(self, Self::Shell { path } if *path == resource.identifier)
            }
            ResourceKind::GitRepo => match (self, resource.source.as_deref()) {
                (Self::Repository { remote }, Some(source)) => same_remote(remote, source),
                _ => false,
            },
            _ => match resource.desired_state {
                DesiredState::Latest => matches!(self, Self::Installed { .. }),
                _ => matches!(self, Self::Installed { .. } | Self::Outdated { .. }),
            },
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Installed { version: Some(v) } => write!(f, "installed ({v})"),
            Self::Installed { version: None } => f.write_str("installed"),
            Self::Outdated {
                installed,
                available,
            } => write!(
                f,
                "outdated ({} -> {})",
                installed.as_deref().unwrap_or("?"),
                available.as_deref().unwrap_or("?")
            ),
            Self::Shell { path } => write!(f, "login shell is {path}"),
            Self::Repository { remote } => write!(f, "repository with origin {remote}"),
            Self::Occupied { detail } => write!(f, "occupied: {detail}"),
        }
    }
}

/// Compare git remotes, ignoring a trailing slash or `.git` suffix.
pub fn same_remote(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.trim().trim_end_matches('/').trim_end_matches(".git").to_string();
    normalize(a) == normalize(b)
}

/// Validated desired-state document
///
/// Globals are kept alongside the derived resource list so callers can
/// report on them; the graph builder only reads `resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredStateDocument {
    pub username: String,
    pub shell: Option<String>,
    pub theme_name: Option<String>,
    pub nerd_fonts: BTreeSet<String>,
    pub homebrew_packages: BTreeSet<String>,
    pub apt_packages: BTreeSet<String>,
    pub pip_packages: BTreeSet<String>,
    pub snap_packages: BTreeSet<String>,
    /// Resources in declaration order
    pub resources: Vec<Resource>,
}

impl DesiredStateDocument {
    /// Create a document holding only the given resources
    pub fn from_resources(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_aliases() {
        assert_eq!("apt".parse::<ResourceKind>(), Ok(ResourceKind::SystemPackage));
        assert_eq!(
            "shell-default".parse::<ResourceKind>(),
            Ok(ResourceKind::ShellDefault)
        );
        assert_eq!("FONT_BUNDLE".parse::<ResourceKind>(), Ok(ResourceKind::FontBundle));
        assert!("rpm".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_parse_ref_keeps_colons_in_identifier() {
        let r: ResourceRef = "git_repo:git@github.com:me/dots".parse().unwrap();
        assert_eq!(r.kind, ResourceKind::GitRepo);
        assert_eq!(r.identifier, "git@github.com:me/dots");
        assert_eq!(r.to_string(), "git_repo:git@github.com:me/dots");
    }

    #[test]
    fn test_parse_ref_rejects_malformed() {
        assert!(matches!(
            "zsh".parse::<ResourceRef>(),
            Err(ParseRefError::Malformed(_))
        ));
        assert!(matches!(
            "apt:".parse::<ResourceRef>(),
            Err(ParseRefError::Malformed(_))
        ));
    }

    #[test]
    fn test_ref_ordering_is_kind_then_identifier() {
        let mut refs = vec![
            ResourceRef::new(ResourceKind::ShellDefault, "/bin/zsh"),
            ResourceRef::new(ResourceKind::SystemPackage, "zsh"),
            ResourceRef::new(ResourceKind::SystemPackage, "git"),
        ];
        refs.sort();
        assert_eq!(refs[0].identifier, "git");
        assert_eq!(refs[1].identifier, "zsh");
        assert_eq!(refs[2].kind, ResourceKind::ShellDefault);
    }

    #[test]
    fn test_fact_satisfies_package_states() {
        let present = Resource::new(ResourceKind::SystemPackage, "git", DesiredState::Present);
        let latest = Resource::new(ResourceKind::SystemPackage, "git", DesiredState::Latest);
        let absent = Resource::new(ResourceKind::SystemPackage, "git", DesiredState::Absent);
        let outdated = Fact::Outdated {
            installed: Some("1".into()),
            available: Some("2".into()),
        };

        assert!(outdated.satisfies(&present));
        assert!(!outdated.satisfies(&latest));
        assert!(!outdated.satisfies(&absent));
        assert!(Fact::Missing.satisfies(&absent));
        assert!(!Fact::Missing.satisfies(&present));
    }

    #[test]
    fn test_fact_satisfies_shell_and_repo() {
        let shell = Resource::new(ResourceKind::ShellDefault, "/bin/zsh", DesiredState::Present);
        assert!(Fact::Shell { path: "/bin/zsh".into() }.satisfies(&shell));
        assert!(!Fact::Shell { path: "/bin/bash".into() }.satisfies(&shell));

        let repo = Resource::new(ResourceKind::GitRepo, "/home/me/.oh-my-zsh", DesiredState::Present)
            .with_source("https://github.com/ohmyzsh/ohmyzsh.git");
        assert!(
            Fact::Repository {
                remote: "https://github.com/ohmyzsh/ohmyzsh".into()
            }
            .satisfies(&repo)
        );
        assert!(
            !Fact::Occupied {
                detail: "not a repository".into()
            }
            .satisfies(&repo)
        );
    }
}
