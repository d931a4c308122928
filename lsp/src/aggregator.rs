//! Per-pass diagnostic accumulation.

use std::collections::{BTreeMap, BTreeSet};

use stencil_types::Diagnostic;
use url::Url;

/// Receives one diagnostics set per file when a pass flushes.
pub trait DiagnosticsPublisher: Send + Sync {
    fn publish(&self, uri: &Url, diagnostics: &[Diagnostic]);
}

/// One file's full diagnostic set at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiagnostics {
    pub uri: Url,
    pub diagnostics: Vec<Diagnostic>,
}

/// Diagnostic map owned by a single validation pass.
///
/// A key with an empty set means the file is valid and its prior markers
/// must be cleared. Files never touched by the pass are absent and are not
/// reported. Sets deduplicate structurally and iterate in a stable order, so
/// identical passes flush identical batches.
#[derive(Debug, Default)]
pub struct DiagnosticAggregator {
    files: BTreeMap<Url, BTreeSet<Diagnostic>>,
}

impl DiagnosticAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the file's set with an empty one.
    pub fn mark_valid(&mut self, uri: Url) {
        self.files.insert(uri, BTreeSet::new());
    }

    pub fn add(&mut self, uri: Url, diagnostic: Diagnostic) {
        self.files.entry(uri).or_default().insert(diagnostic);
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<&BTreeSet<Diagnostic>> {
        self.files.get(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.files
            .values()
            .flatten()
            .filter(|d| d.severity().is_error())
            .count()
    }

    #[must_use]
    pub fn into_batches(self) -> Vec<FileDiagnostics> {
        self.files
            .into_iter()
            .map(|(uri, set)| FileDiagnostics {
                uri,
                diagnostics: set.into_iter().collect(),
            })
            .collect()
    }

    /// Publish every file's set, consuming the pass's map.
    pub fn flush(self, publisher: &dyn DiagnosticsPublisher) {
        for batch in self.into_batches() {
            tracing::debug!(
                uri = %batch.uri,
                count = batch.diagnostics.len(),
                "Publishing diagnostics"
            );
            publisher.publish(&batch.uri, &batch.diagnostics);
        }
    }
}
