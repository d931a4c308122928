//! Positioned diagnostics as reported to the editor.
//!
//! Positions are zero-based on both axes. The serialized form is the wire
//! shape of an LSP `Diagnostic`, so a [`Diagnostic`] can be published
//! without a second conversion step.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open span between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// The document-start range, `(0,0)-(0,0)`.
    ///
    /// Editors highlight the first word of the file for this range.
    pub const DOCUMENT_START: Self = Self::point(Position::new(0, 0));

    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `at`.
    #[must_use]
    pub const fn point(at: Position) -> Self {
        Self { start: at, end: at }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Severity level for a diagnostic.
///
/// Serialized as the LSP numeric code (1=Error, 2=Warning, 3=Info, 4=Hint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Severity::Error),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Information),
            4 => Ok(Severity::Hint),
            other => Err(format!("unknown diagnostic severity {other}")),
        }
    }
}

impl Severity {
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error)
    }
}

/// The validation stage a diagnostic originated from.
///
/// Stages run in declaration order; each one gates the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Model,
    Logic,
    Template,
    Sample,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Logic => "logic",
            Self::Template => "template",
            Self::Sample => "sample",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single positioned diagnostic.
///
/// Equality and ordering are structural over every field, so a set of
/// diagnostics deduplicates identical reports and iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    range: Range,
    severity: Severity,
    #[serde(rename = "source")]
    stage: Stage,
    message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: Severity, range: Range, message: impl Into<String>, stage: Stage) -> Self {
        Self {
            range,
            severity,
            stage,
            message: message.into(),
        }
    }

    /// An error-severity diagnostic; every stage failure is reported this way.
    #[must_use]
    pub fn error(range: Range, message: impl Into<String>, stage: Stage) -> Self {
        Self::new(Severity::Error, range, message, stage)
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }
}
