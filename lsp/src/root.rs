//! Package root resolution.
//!
//! A package root is the nearest ancestor directory whose manifest parses
//! as JSON and carries the marker key. The walk is bounded by the path's
//! ancestors, so it always terminates at the filesystem root.

use std::fs;
use std::path::{Path, PathBuf};

use stencil_types::PackageLayout;

/// No ancestor of `path` holds a manifest with the marker key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{} is not a sub-folder of a template package. Ensure a parent folder contains a valid {manifest} with a \"{marker}\" entry.",
    path.display()
)]
pub struct RootNotFound {
    path: PathBuf,
    manifest: String,
    marker: String,
}

impl RootNotFound {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct RootResolver {
    manifest_file: String,
    marker_key: String,
}

impl RootResolver {
    #[must_use]
    pub fn new(layout: &PackageLayout) -> Self {
        Self {
            manifest_file: layout.manifest_file().to_string(),
            marker_key: layout.marker_key().to_string(),
        }
    }

    /// Find the package root enclosing `path`, starting at its parent directory.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, RootNotFound> {
        let start = path.parent().unwrap_or(path);
        for dir in start.ancestors().filter(|d| !d.as_os_str().is_empty()) {
            tracing::trace!(dir = %dir.display(), "Checking for package manifest");
            if self.is_package_root(dir) {
                tracing::debug!(root = %dir.display(), "Resolved package root");
                return Ok(dir.to_path_buf());
            }
        }

        tracing::info!(path = %path.display(), "Failed to find package root");
        Err(RootNotFound {
            path: path.to_path_buf(),
            manifest: self.manifest_file.clone(),
            marker: self.marker_key.clone(),
        })
    }

    fn is_package_root(&self, dir: &Path) -> bool {
        let manifest_path = dir.join(&self.manifest_file);
        let contents = match fs::read_to_string(&manifest_path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::trace!(path = %manifest_path.display(), "No readable manifest: {e}");
                return false;
            }
        };
        let manifest: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::debug!(path = %manifest_path.display(), "Unparsable manifest: {e}");
                return false;
            }
        };
        has_marker(&manifest, &self.marker_key)
    }
}

/// The marker counts when present and neither `null` nor `false`.
fn has_marker(manifest: &serde_json::Value, marker: &str) -> bool {
    match manifest.get(marker) {
        None | Some(serde_json::Value::Null | serde_json::Value::Bool(false)) => false,
        Some(_) => true,
    }
}
