//! Desired-state document loading
//!
//! The document is TOML or JSON (chosen by file extension) with camelCase
//! keys. Unknown keys are rejected. Loading produces a validated
//! [`DesiredStateDocument`]; nothing here touches the machine beyond reading
//! the document and its requirements files.

use converge::{
    DesiredState, DesiredStateDocument, ParseRefError, Resource, ResourceKind, ResourceRef,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Requirements files merged from `requirementsDir`, one per manager
const REQUIREMENTS: [(&str, ResourceKind); 4] = [
    ("apt.txt", ResourceKind::SystemPackage),
    ("brew.txt", ResourceKind::BrewPackage),
    ("pip.txt", ResourceKind::PipPackage),
    ("snap.txt", ResourceKind::SnapPackage),
];

/// Errors that make a desired-state document unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unsupported config format for {} (expected .toml or .json)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid reference in {field}: {source}")]
    InvalidReference {
        field: String,
        source: ParseRefError,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("could not determine home directory")]
    NoHome,
}

/// On-disk shape of the document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DocumentFile {
    pub username: Option<String>,
    pub apt_packages: BTreeSet<String>,
    pub homebrew_packages: BTreeSet<String>,
    pub pip_packages: BTreeSet<String>,
    pub snap_packages: BTreeSet<String>,
    pub nerd_fonts: BTreeSet<String>,
    pub shell: Option<String>,
    pub theme_name: Option<String>,
    pub theme_source: Option<String>,
    pub git_repos: Vec<GitRepoEntry>,
    /// Resources that must not be installed, as `kind:identifier`
    pub absent: Vec<String>,
    /// Extra dependencies: `kind:identifier` -> list of `kind:identifier`
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub requirements_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitRepoEntry {
    pub url: String,
    pub path: String,
}

/// Default document location: `~/.config/provision/config.toml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(".config").join("provision").join("config.toml"))
}

/// Load and validate a desired-state document.
pub fn load(path: &Path) -> Result<DesiredStateDocument, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = parse(path, &content)?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    resolve(file, base_dir)
}

/// Parse document text according to the file extension.
pub fn parse(path: &Path, content: &str) -> Result<DocumentFile, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        }),
        Some("json") => serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Turn a parsed document into resources.
///
/// `base_dir` anchors a relative `requirementsDir`.
pub fn resolve(mut file: DocumentFile, base_dir: &Path) -> Result<DesiredStateDocument, ConfigError> {
    let username = file
        .username
        .take()
        .or_else(current_user)
        .ok_or_else(|| ConfigError::Invalid("username is not set and USER is empty".into()))?;

    if let Some(dir) = file.requirements_dir.take() {
        let dir = base_dir.join(expand(&dir));
        merge_requirements(&mut file, &dir)?;
    }

    let mut resources = Vec::new();
    let packages = [
        (ResourceKind::SystemPackage, &file.apt_packages),
        (ResourceKind::BrewPackage, &file.homebrew_packages),
        (ResourceKind::PipPackage, &file.pip_packages),
        (ResourceKind::SnapPackage, &file.snap_packages),
    ];
    for (kind, names) in packages {
        for name in names {
            validate_name(kind, name)?;
            resources.push(Resource::new(kind, name.clone(), DesiredState::Latest));
        }
    }

    for repo in &file.git_repos {
        if repo.url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "git repository at '{}' has an empty url",
                repo.path
            )));
        }
        let path = expand(&repo.path);
        resources.push(
            Resource::new(ResourceKind::GitRepo, path, DesiredState::Present)
                .with_source(repo.url.trim()),
        );
    }

    if let Some(shell) = &file.shell {
        if !Path::new(shell).is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "shell must be an absolute path, got '{shell}'"
            )));
        }
        resources.push(Resource::new(
            ResourceKind::ShellDefault,
            shell.clone(),
            DesiredState::Present,
        ));
    }

    for font in &file.nerd_fonts {
        validate_name(ResourceKind::FontBundle, font)?;
        resources.push(Resource::new(
            ResourceKind::FontBundle,
            font.clone(),
            DesiredState::Present,
        ));
    }

    match (&file.theme_name, &file.theme_source) {
        (Some(name), Some(source)) => {
            validate_name(ResourceKind::ThemeBundle, name)?;
            resources.push(
                Resource::new(ResourceKind::ThemeBundle, name.clone(), DesiredState::Present)
                    .with_source(source.trim()),
            );
        }
        (Some(name), None) => {
            return Err(ConfigError::Invalid(format!(
                "themeName '{name}' needs a themeSource to install from"
            )));
        }
        (None, Some(_)) => {
            return Err(ConfigError::Invalid("themeSource is set without themeName".into()));
        }
        (None, None) => {}
    }

    apply_absent(&mut resources, &file.absent)?;
    apply_dependencies(&mut resources, &file.dependencies)?;
    if let Some(shell) = &file.shell {
        add_shell_dependency(&mut resources, shell);
    }

    Ok(DesiredStateDocument {
        username,
        shell: file.shell,
        theme_name: file.theme_name,
        nerd_fonts: file.nerd_fonts,
        homebrew_packages: file.homebrew_packages,
        apt_packages: file.apt_packages,
        pip_packages: file.pip_packages,
        snap_packages: file.snap_packages,
        resources,
    })
}

fn current_user() -> Option<String> {
    ["USER", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty())
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

/// Names become command arguments, so they may not look like options.
fn validate_name(kind: ResourceKind, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "invalid {kind} name '{name}'"
        )));
    }
    // Font and theme names become directory names
    let is_bundle = matches!(kind, ResourceKind::FontBundle | ResourceKind::ThemeBundle);
    if is_bundle && (name.contains('/') || name == "." || name == "..") {
        return Err(ConfigError::Invalid(format!(
            "{kind} name '{name}' must be a single path component"
        )));
    }
    Ok(())
}

/// Parse a requirements file: one name per line, `#` starts a comment line.
pub fn parse_requirements(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn merge_requirements(file: &mut DocumentFile, dir: &Path) -> Result<(), ConfigError> {
    for (name, kind) in REQUIREMENTS {
        let path = dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("requirements file {} not found, skipping", path.display());
                continue;
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let target = match kind {
            ResourceKind::SystemPackage => &mut file.apt_packages,
            ResourceKind::BrewPackage => &mut file.homebrew_packages,
            ResourceKind::PipPackage => &mut file.pip_packages,
            _ => &mut file.snap_packages,
        };
        let names = parse_requirements(&content);
        log::debug!("{} packages from {}", names.len(), path.display());
        target.extend(names);
    }
    Ok(())
}

fn parse_ref(field: &str, text: &str) -> Result<ResourceRef, ConfigError> {
    let mut reference: ResourceRef =
        text.parse().map_err(|source| ConfigError::InvalidReference {
            field: field.to_string(),
            source,
        })?;
    if reference.kind == ResourceKind::GitRepo {
        reference.identifier = expand(&reference.identifier);
    }
    Ok(reference)
}

fn apply_absent(resources: &mut Vec<Resource>, absent: &[String]) -> Result<(), ConfigError> {
    for text in absent {
        let reference = parse_ref("absent", text)?;
        if !reference.kind.is_package() {
            return Err(ConfigError::Invalid(format!(
                "only packages can be declared absent, got '{reference}'"
            )));
        }
        validate_name(reference.kind, &reference.identifier)?;
        match resources.iter_mut().find(|r| r.reference() == reference) {
            Some(resource) => resource.desired_state = DesiredState::Absent,
            None => resources.push(Resource::new(
                reference.kind,
                reference.identifier,
                DesiredState::Absent,
            )),
        }
    }
    Ok(())
}

fn apply_dependencies(
    resources: &mut [Resource],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<(), ConfigError> {
    for (from, targets) in dependencies {
        let from = parse_ref("dependencies", from)?;
        let targets = targets
            .iter()
            .map(|t| parse_ref("dependencies", t))
            .collect::<Result<Vec<_>, _>>()?;
        let resource = resources
            .iter_mut()
            .find(|r| r.reference() == from)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("dependencies declared for unknown resource '{from}'"))
            })?;
        resource.depends_on.extend(targets);
    }
    Ok(())
}

/// The login shell depends on any package that installs a binary of the same name.
fn add_shell_dependency(resources: &mut [Resource], shell: &str) {
    let Some(binary) = Path::new(shell).file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let providers: Vec<ResourceRef> = resources
        .iter()
        .filter(|r| {
            r.kind.is_package() && r.identifier == binary && r.desired_state != DesiredState::Absent
        })
        .map(Resource::reference)
        .collect();
    if let Some(shell) = resources
        .iter_mut()
        .find(|r| r.kind == ResourceKind::ShellDefault)
    {
        shell.depends_on.extend(providers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolve_toml(text: &str) -> Result<DesiredStateDocument, ConfigError> {
        let file = parse(Path::new("config.toml"), text)?;
        resolve(file, Path::new("."))
    }

    fn find<'a>(doc: &'a DesiredStateDocument, kind: ResourceKind, id: &str) -> &'a Resource {
        doc.resources
            .iter()
            .find(|r| r.kind == kind && r.identifier == id)
            .unwrap()
    }

    #[test]
    fn test_packages_fonts_and_shell() {
        let doc = resolve_toml(
            r#"
username = "dev"
aptPackages = ["zsh", "tmux"]
homebrewPackages = ["ripgrep"]
pipPackages = ["ipython"]
snapPackages = ["code"]
nerdFonts = ["FiraCode"]
shell = "/bin/zsh"
"#,
        )
        .unwrap();

        assert_eq!(doc.username, "dev");
        assert_eq!(doc.resources.len(), 7);
        assert_eq!(
            find(&doc, ResourceKind::SystemPackage, "zsh").desired_state,
            DesiredState::Latest
        );
        assert_eq!(
            find(&doc, ResourceKind::FontBundle, "FiraCode").desired_state,
            DesiredState::Present
        );

        let shell = find(&doc, ResourceKind::ShellDefault, "/bin/zsh");
        assert!(
            shell
                .depends_on
                .contains(&ResourceRef::new(ResourceKind::SystemPackage, "zsh"))
        );
    }

    #[test]
    fn test_json_document() {
        let json = r#"{
            "username": "dev",
            "aptPackages": ["curl"],
            "gitRepos": [{"url": "https://github.com/ohmyzsh/ohmyzsh.git", "path": "/opt/ohmyzsh"}]
        }"#;
        let file = parse(Path::new("desired.json"), json).unwrap();
        let doc = resolve(file, Path::new(".")).unwrap();
        let repo = find(&doc, ResourceKind::GitRepo, "/opt/ohmyzsh");
        assert_eq!(
            repo.source.as_deref(),
            Some("https://github.com/ohmyzsh/ohmyzsh.git")
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = resolve_toml("username = \"dev\"\naptPackage = [\"zsh\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));

        let err = parse(
            Path::new("c.json"),
            r#"{"gitRepos": [{"url": "u", "path": "p", "branch": "main"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse(Path::new("config.yaml"), "").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_theme_needs_source() {
        let err = resolve_toml("username = \"dev\"\nthemeName = \"Dracula\"\n").unwrap_err();
        assert!(err.to_string().contains("themeSource"));

        let doc = resolve_toml(
            "username = \"dev\"\nthemeName = \"Dracula\"\nthemeSource = \"https://github.com/dracula/gtk\"\n",
        )
        .unwrap();
        assert_eq!(
            find(&doc, ResourceKind::ThemeBundle, "Dracula").source.as_deref(),
            Some("https://github.com/dracula/gtk")
        );
    }

    #[test]
    fn test_relative_shell_is_rejected() {
        let err = resolve_toml("username = \"dev\"\nshell = \"zsh\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_option_like_names_are_rejected() {
        let err = resolve_toml("username = \"dev\"\naptPackages = [\"--purge\"]\n").unwrap_err();
        assert!(err.to_string().contains("--purge"));

        let err = resolve_toml("username = \"dev\"\nnerdFonts = [\"../../bin\"]\n").unwrap_err();
        assert!(err.to_string().contains("single path component"));
    }

    #[test]
    fn test_absent_overrides_and_adds() {
        let doc = resolve_toml(
            r#"
username = "dev"
aptPackages = ["nano", "vim"]
absent = ["apt:nano", "snap:firefox"]
"#,
        )
        .unwrap();
        assert_eq!(
            find(&doc, ResourceKind::SystemPackage, "nano").desired_state,
            DesiredState::Absent
        );
        assert_eq!(
            find(&doc, ResourceKind::SnapPackage, "firefox").desired_state,
            DesiredState::Absent
        );
        assert_eq!(
            find(&doc, ResourceKind::SystemPackage, "vim").desired_state,
            DesiredState::Latest
        );

        let err = resolve_toml("username = \"dev\"\nabsent = [\"shell:/bin/zsh\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_explicit_dependencies() {
        let doc = resolve_toml(
            r#"
username = "dev"
aptPackages = ["python3-pip"]
pipPackages = ["ipython"]

[dependencies]
"pip:ipython" = ["apt:python3-pip"]
"#,
        )
        .unwrap();
        let ipython = find(&doc, ResourceKind::PipPackage, "ipython");
        assert!(
            ipython
                .depends_on
                .contains(&ResourceRef::new(ResourceKind::SystemPackage, "python3-pip"))
        );

        let err = resolve_toml(
            "username = \"dev\"\n[dependencies]\n\"pip:ghost\" = [\"apt:curl\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("pip_package:ghost"));

        let err =
            resolve_toml("username = \"dev\"\n[dependencies]\n\"rpm:x\" = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReference { .. }));
    }

    #[test]
    fn test_parse_requirements_skips_comments_and_blanks() {
        let names = parse_requirements("# core tools\ncurl\n\n  git  \n#vim\n");
        assert_eq!(names, vec!["curl", "git"]);
    }

    #[test]
    fn test_requirements_dir_is_merged() {
        let dir = TempDir::new().unwrap();
        let reqs = dir.path().join("requirements");
        fs::create_dir(&reqs).unwrap();
        fs::write(reqs.join("apt.txt"), "# base\ncurl\nzsh\n").unwrap();
        fs::write(reqs.join("pip.txt"), "ipython\n").unwrap();
        // brew.txt and snap.txt missing: skipped with a warning

        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            "username = \"dev\"\naptPackages = [\"tmux\"]\nrequirementsDir = \"requirements\"\n",
        )
        .unwrap();

        let doc = load(&config).unwrap();
        let apt: Vec<_> = doc.apt_packages.iter().map(String::as_str).collect();
        assert_eq!(apt, vec!["curl", "tmux", "zsh"]);
        assert!(doc.pip_packages.contains("ipython"));
        assert!(doc.homebrew_packages.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = load(Path::new("/nonexistent/provision.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
