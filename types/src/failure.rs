//! The closed set of failure shapes reported by the compilation engines.
//!
//! The model compiler, the logic compiler and the template engine each
//! describe errors differently. Engine adapters translate their native
//! errors into a [`Failure`] so the pipeline only ever normalizes one type.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A one-based line, zero-based column location (parser style).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A compiler descriptor position. Line `0` means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPos {
    pub line: u32,
    pub character: u32,
}

impl DescriptorPos {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    CompilationError,
    TypeError,
    Other(String),
}

impl DescriptorKind {
    /// Parse a compiler's descriptor kind tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "CompilationError" => Self::CompilationError,
            "TypeError" => Self::TypeError,
            other => Self::Other(other.to_string()),
        }
    }

    /// Compile and type errors report a point, not a span.
    #[must_use]
    pub fn is_point_error(&self) -> bool {
        matches!(self, Self::CompilationError | Self::TypeError)
    }
}

/// Where a failure says it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureLocation {
    /// Direct parser location with one-based lines.
    File { start: SourcePos, end: SourcePos },
    /// Compiler-style descriptor.
    Descriptor {
        kind: DescriptorKind,
        locstart: Option<DescriptorPos>,
        locend: Option<DescriptorPos>,
        /// Long-form compiler output; may embed an `at file <path>` fragment.
        verbose: Option<String>,
    },
    /// Only a message is available.
    Unlocated,
}

/// A failure from one of the compilation engines or from reading a source file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
    file: Option<PathBuf>,
    model_file: Option<String>,
    location: FailureLocation,
}

impl Failure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            model_file: None,
            location: FailureLocation::Unlocated,
        }
    }

    /// A source file could not be read.
    ///
    /// The failure is attributed to the unreadable file itself.
    #[must_use]
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        Self::new(format!("Failed to read {}: {err}", path.display())).with_file(path)
    }

    #[must_use]
    pub fn at_file_location(mut self, start: SourcePos, end: SourcePos) -> Self {
        self.location = FailureLocation::File { start, end };
        self
    }

    #[must_use]
    pub fn with_descriptor(
        mut self,
        kind: DescriptorKind,
        locstart: Option<DescriptorPos>,
        locend: Option<DescriptorPos>,
        verbose: Option<String>,
    ) -> Self {
        self.location = FailureLocation::Descriptor {
            kind,
            locstart,
            locend,
            verbose,
        };
        self
    }

    /// Attribute the failure to an explicit file, replacing any earlier one.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Record the name of the model file the model compiler blamed.
    #[must_use]
    pub fn with_model_file(mut self, name: impl Into<String>) -> Self {
        self.model_file = Some(name.into());
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    #[must_use]
    pub fn model_file(&self) -> Option<&str> {
        self.model_file.as_deref()
    }

    #[must_use]
    pub fn location(&self) -> &FailureLocation {
        &self.location
    }

    /// The descriptor's verbose text, when the failure carries one.
    #[must_use]
    pub fn verbose(&self) -> Option<&str> {
        match &self.location {
            FailureLocation::Descriptor { verbose, .. } => verbose.as_deref(),
            _ => None,
        }
    }
}
