//! Nerd Fonts release archives unpacked under the user's font directory

use super::{MARKER_FILE, Toolbox};
use converge::{CancelToken, Fact, NodeError, Provider, Resource};
use pkgkit::CommandSpec;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct FontBundleProvider {
    toolbox: Toolbox,
}

impl FontBundleProvider {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn install_dir(&self, name: &str) -> PathBuf {
        self.toolbox.settings().fonts_dir().join(name)
    }

    fn download_url(&self, name: &str) -> String {
        let base = self.toolbox.settings().font_base_url.trim_end_matches('/');
        format!("{base}/{name}.zip")
    }
}

fn has_font_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .any(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
        })
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> NodeError {
    NodeError::other(format!("cannot {action} {}: {err}", path.display()))
}

impl Provider for FontBundleProvider {
    fn probe(&self, resource: &Resource, _cancel: &CancelToken) -> Result<Fact, NodeError> {
        let dir = self.install_dir(&resource.identifier);
        if dir.join(MARKER_FILE).is_file() && has_font_files(&dir) {
            Ok(Fact::Installed { version: None })
        } else {
            Ok(Fact::Missing)
        }
    }

    fn apply(&self, resource: &Resource, _fact: &Fact, cancel: &CancelToken) -> Result<(), NodeError> {
        let name = &resource.identifier;
        let dir = self.install_dir(name);
        fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;

        let archive = dir.join(format!("{name}.zip"));
        let archive_arg = archive.to_string_lossy().to_string();
        let download = CommandSpec::new("curl")
            .args(["-fsSL", "-o", archive_arg.as_str()])
            .arg(self.download_url(name));
        self.toolbox
            .run(download, &self.toolbox.options().idempotent(), cancel)?;

        let unzip = CommandSpec::new("unzip")
            .args(["-o", "-q", archive_arg.as_str(), "-d"])
            .arg(dir.to_string_lossy());
        self.toolbox.run(unzip, &self.toolbox.options(), cancel)?;
        fs::remove_file(&archive).map_err(|e| io_error("remove", &archive, e))?;

        if !has_font_files(&dir) {
            return Err(NodeError::other(format!(
                "{name}.zip contained no .ttf or .otf files"
            )));
        }

        // The fonts are usable without a cache rebuild
        let cache = CommandSpec::new("fc-cache").arg("-f").arg(dir.to_string_lossy());
        if let Err(e) = self.toolbox.run(cache, &self.toolbox.options(), cancel) {
            if matches!(e, NodeError::Cancelled) {
                return Err(e);
            }
            log::warn!("fc-cache failed for {name}: {e}");
        }

        let marker = dir.join(MARKER_FILE);
        fs::write(&marker, format!("{}\n", self.download_url(name)))
            .map_err(|e| io_error("write", &marker, e))?;
        Ok(())
    }
}
