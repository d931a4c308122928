//! Normalizes engine failures into ranges and file attributions.

use std::path::{Path, PathBuf};

use regex::Regex;
use stencil_types::{DescriptorPos, Failure, FailureLocation, Position, Range, SourcePos};
use url::Url;

use crate::protocol::{self, PathToUriError};

/// The document whose change triggered the current pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub document_uri: &'a Url,
    pub document_path: &'a Path,
    pub root: Option<&'a Path>,
}

impl PassContext<'_> {
    /// File URI for `path`, reusing the document's own URI when `path` is the
    /// changed file so that both spellings land on one key.
    pub fn uri_for(&self, path: &Path) -> Result<Url, PathToUriError> {
        if path == self.document_path {
            return Ok(self.document_uri.clone());
        }
        protocol::path_to_file_uri(path)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLocationExtractor {
    verbose_file: Regex,
}

impl ErrorLocationExtractor {
    /// Build an extractor that recognizes `at file <path>.<logic_extension>`
    /// fragments in verbose compiler output.
    ///
    /// The capture is greedy up to the last logic extension on the line, so
    /// paths containing spaces survive.
    pub fn new(logic_extension: &str) -> Result<Self, regex::Error> {
        let pattern = format!(r"at file (.+\.{})", regex::escape(logic_extension));
        Ok(Self {
            verbose_file: Regex::new(&pattern)?,
        })
    }

    /// Best-effort range for a failure; never fails.
    #[must_use]
    pub fn extract_range(&self, failure: &Failure) -> Range {
        match failure.location() {
            FailureLocation::File { start, end } => {
                Range::new(from_source_pos(*start), from_source_pos(*end))
            }
            FailureLocation::Descriptor {
                kind,
                locstart,
                locend,
                ..
            } => {
                let start = locstart.filter(DescriptorPos::is_known);
                let end = locend.filter(DescriptorPos::is_known);
                if kind.is_point_error() {
                    match (start, end) {
                        (Some(start), _) => Range::point(from_descriptor_pos(start)),
                        (None, Some(end)) => Range::new(Position::new(0, 0), from_descriptor_pos(end)),
                        (None, None) => Range::DOCUMENT_START,
                    }
                } else {
                    match (start, end) {
                        (Some(start), Some(end)) => {
                            Range::new(from_descriptor_pos(start), from_descriptor_pos(end))
                        }
                        _ => Range::DOCUMENT_START,
                    }
                }
            }
            FailureLocation::Unlocated => Range::DOCUMENT_START,
        }
    }

    /// Pick the file a failure belongs to.
    ///
    /// Order: explicit file, then a path in verbose compiler text (fragile,
    /// last-resort pattern match), then the model file name, then the
    /// triggering document. Relative paths resolve against the package root.
    #[must_use]
    pub fn attribute_file(&self, failure: &Failure, cx: &PassContext<'_>) -> Url {
        let candidate = failure
            .file()
            .map(Path::to_path_buf)
            .or_else(|| self.verbose_path(failure))
            .or_else(|| failure.model_file().map(PathBuf::from));

        let Some(path) = candidate else {
            return cx.document_uri.clone();
        };
        let path = match cx.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        };
        match cx.uri_for(&path) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::debug!("{e}, attributing failure to the document");
                cx.document_uri.clone()
            }
        }
    }

    fn verbose_path(&self, failure: &Failure) -> Option<PathBuf> {
        let verbose = failure.verbose()?;
        let captures = self.verbose_file.captures(verbose)?;
        captures.get(1).map(|m| PathBuf::from(m.as_str()))
    }
}

/// One-based parser lines become zero-based; columns pass through.
fn from_source_pos(pos: SourcePos) -> Position {
    Position::new(pos.line.saturating_sub(1), pos.column)
}

fn from_descriptor_pos(pos: DescriptorPos) -> Position {
    Position::new(pos.line.saturating_sub(1), pos.character)
}
