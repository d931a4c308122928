//! Resolved configuration types shared across crates.
//!
//! These types represent fully-validated, resolved configuration state.
//! Raw deserialization structs stay private here; the config loader and the
//! session resolve them into these types at the parse boundary.
//!
//! Existence of a value is the proof of its validity.

use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be given without a leading dot (got {value:?})")]
    DottedExtension { field: &'static str, value: String },
    #[error("model, logic and grammar extensions must be distinct")]
    DuplicateExtension,
    #[error("{field} must be a relative path inside the package (got {value:?})")]
    NotRelative { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheSettingsError {
    #[error("max_roots must be greater than zero")]
    ZeroCapacity,
}

/// What role a source file plays in a template package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Model,
    Logic,
    Grammar,
    Other,
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPackageLayout {
    manifest_file: String,
    marker_key: String,
    model_extension: String,
    logic_extension: String,
    grammar_extension: String,
    models_dir: String,
    logic_dir: String,
    grammar_file: String,
    sample_file: String,
}

impl Default for RawPackageLayout {
    fn default() -> Self {
        Self {
            manifest_file: "package.json".to_string(),
            marker_key: "accordproject".to_string(),
            model_extension: "cto".to_string(),
            logic_extension: "ergo".to_string(),
            grammar_extension: "tem".to_string(),
            models_dir: "models".to_string(),
            logic_dir: "lib".to_string(),
            grammar_file: "grammar/template.tem".to_string(),
            sample_file: "sample.txt".to_string(),
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), LayoutError> {
    if value.trim().is_empty() {
        return Err(LayoutError::Empty { field });
    }
    Ok(())
}

fn extension(field: &'static str, value: String) -> Result<String, LayoutError> {
    non_empty(field, &value)?;
    if value.starts_with('.') {
        return Err(LayoutError::DottedExtension { field, value });
    }
    Ok(value)
}

fn relative(field: &'static str, value: String) -> Result<PathBuf, LayoutError> {
    non_empty(field, &value)?;
    let path = PathBuf::from(&value);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(LayoutError::NotRelative { field, value });
    }
    Ok(path)
}

/// Validated file-layout conventions of a template package.
///
/// Invariants: every name is non-empty, extensions carry no leading dot and
/// are pairwise distinct, and every root-relative path stays inside the
/// package (enforced via `#[serde(try_from)]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPackageLayout")]
pub struct PackageLayout {
    manifest_file: String,
    marker_key: String,
    model_extension: String,
    logic_extension: String,
    grammar_extension: String,
    models_dir: PathBuf,
    logic_dir: PathBuf,
    grammar_file: PathBuf,
    sample_file: PathBuf,
}

impl TryFrom<RawPackageLayout> for PackageLayout {
    type Error = LayoutError;

    fn try_from(raw: RawPackageLayout) -> Result<Self, Self::Error> {
        non_empty("manifest_file", &raw.manifest_file)?;
        non_empty("marker_key", &raw.marker_key)?;
        let model_extension = extension("model_extension", raw.model_extension)?;
        let logic_extension = extension("logic_extension", raw.logic_extension)?;
        let grammar_extension = extension("grammar_extension", raw.grammar_extension)?;
        if model_extension == logic_extension
            || model_extension == grammar_extension
            || logic_extension == grammar_extension
        {
            return Err(LayoutError::DuplicateExtension);
        }
        Ok(Self {
            manifest_file: raw.manifest_file,
            marker_key: raw.marker_key,
            model_extension,
            logic_extension,
            grammar_extension,
            models_dir: relative("models_dir", raw.models_dir)?,
            logic_dir: relative("logic_dir", raw.logic_dir)?,
            grammar_file: relative("grammar_file", raw.grammar_file)?,
            sample_file: relative("sample_file", raw.sample_file)?,
        })
    }
}

impl Default for PackageLayout {
    fn default() -> Self {
        Self {
            manifest_file: "package.json".to_string(),
            marker_key: "accordproject".to_string(),
            model_extension: "cto".to_string(),
            logic_extension: "ergo".to_string(),
            grammar_extension: "tem".to_string(),
            models_dir: PathBuf::from("models"),
            logic_dir: PathBuf::from("lib"),
            grammar_file: PathBuf::from("grammar").join("template.tem"),
            sample_file: PathBuf::from("sample.txt"),
        }
    }
}

impl PackageLayout {
    /// File name of the package manifest looked up in each ancestor directory.
    #[must_use]
    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    /// Top-level manifest key whose presence marks a package root.
    #[must_use]
    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    #[must_use]
    pub fn model_extension(&self) -> &str {
        &self.model_extension
    }

    #[must_use]
    pub fn logic_extension(&self) -> &str {
        &self.logic_extension
    }

    #[must_use]
    pub fn grammar_extension(&self) -> &str {
        &self.grammar_extension
    }

    #[must_use]
    pub fn models_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.models_dir)
    }

    #[must_use]
    pub fn logic_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.logic_dir)
    }

    #[must_use]
    pub fn grammar_file(&self, root: &Path) -> PathBuf {
        root.join(&self.grammar_file)
    }

    #[must_use]
    pub fn sample_file(&self, root: &Path) -> PathBuf {
        root.join(&self.sample_file)
    }

    /// Classify a path by its extension.
    #[must_use]
    pub fn classify(&self, path: &Path) -> SourceKind {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return SourceKind::Other;
        };
        if ext == self.model_extension {
            SourceKind::Model
        } else if ext == self.logic_extension {
            SourceKind::Logic
        } else if ext == self.grammar_extension {
            SourceKind::Grammar
        } else {
            SourceKind::Other
        }
    }
}

#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCacheSettings {
    max_roots: usize,
}

impl Default for RawCacheSettings {
    fn default() -> Self {
        Self {
            max_roots: CacheSettings::DEFAULT_MAX_ROOTS.get(),
        }
    }
}

/// Bounds on the per-root compiled-state cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCacheSettings")]
pub struct CacheSettings {
    max_roots: NonZeroUsize,
}

impl CacheSettings {
    pub const DEFAULT_MAX_ROOTS: NonZeroUsize = NonZeroUsize::new(16).unwrap();

    #[must_use]
    pub fn new(max_roots: NonZeroUsize) -> Self {
        Self { max_roots }
    }

    #[must_use]
    pub fn max_roots(&self) -> NonZeroUsize {
        self.max_roots
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ROOTS)
    }
}

impl TryFrom<RawCacheSettings> for CacheSettings {
    type Error = CacheSettingsError;

    fn try_from(raw: RawCacheSettings) -> Result<Self, Self::Error> {
        NonZeroUsize::new(raw.max_roots)
            .map(Self::new)
            .ok_or(CacheSettingsError::ZeroCapacity)
    }
}

/// Behaviour of the editor session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Revalidate every open document after any change, not just the changed one.
    pub revalidate_open_documents: bool,
}
