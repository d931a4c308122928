//! Source file enumeration under package directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use stencil_types::PackageLayout;

#[derive(Debug, thiserror::Error)]
#[error("invalid source glob '{pattern}': {source}")]
pub struct DiscoveryError {
    pattern: String,
    source: globset::Error,
}

/// Which sources to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSet {
    Models,
    Logic,
}

/// Finds model and logic sources by extension, recursively.
///
/// Hidden entries and `.git` are skipped; ignore files are not consulted.
#[derive(Debug, Clone)]
pub struct SourceDiscovery {
    models: GlobMatcher,
    logic: GlobMatcher,
}

impl SourceDiscovery {
    pub fn new(layout: &PackageLayout) -> Result<Self, DiscoveryError> {
        Ok(Self {
            models: extension_matcher(layout.model_extension())?,
            logic: extension_matcher(layout.logic_extension())?,
        })
    }

    /// Every matching file under `dirs`, sorted and deduplicated.
    ///
    /// Missing directories contribute nothing. Entries the walker cannot read
    /// are logged and skipped.
    #[must_use]
    pub fn find(&self, dirs: &[PathBuf], set: SourceSet) -> Vec<PathBuf> {
        let matcher = match set {
            SourceSet::Models => &self.models,
            SourceSet::Logic => &self.logic,
        };
        let mut found = BTreeSet::new();
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            let walker = WalkBuilder::new(dir)
                .standard_filters(false)
                .hidden(true)
                .filter_entry(|entry| entry.file_name() != ".git")
                .build();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), "Skipping unreadable entry: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    continue;
                }
                if matcher.is_match(entry.file_name()) {
                    found.insert(entry.into_path());
                }
            }
        }
        tracing::trace!(count = found.len(), ?set, "Discovered sources");
        found.into_iter().collect()
    }
}

fn extension_matcher(extension: &str) -> Result<GlobMatcher, DiscoveryError> {
    let pattern = format!("*.{}", globset::escape(extension));
    let mut glob = GlobBuilder::new(&pattern);
    glob.literal_separator(true);
    if cfg!(windows) {
        glob.case_insensitive(true);
    }
    glob.build()
        .map(|g| g.compile_matcher())
        .map_err(|source| DiscoveryError { pattern, source })
}

/// The directories a stage scans: the changed file's directory plus the
/// layout directory under the root.
pub(crate) fn scan_dirs(changed: &Path, layout_dir: PathBuf) -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(2);
    if let Some(parent) = changed.parent() {
        dirs.push(parent.to_path_buf());
    }
    if !dirs.contains(&layout_dir) {
        dirs.push(layout_dir);
    }
    dirs
}
