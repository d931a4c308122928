//! The staged validation pipeline.
//!
//! One call to [`ValidationPipeline::validate`] is one pass for one changed
//! document: resolve the package root, rebuild the model registry, then
//! cascade into the logic, template and sample stages according to the
//! changed file's kind. Each stage short-circuits the ones after it.
//!
//! | changed file | stages                                   |
//! |--------------|------------------------------------------|
//! | model        | model → logic → template → sample        |
//! | logic        | model → logic                            |
//! | grammar      | model → template → sample                |
//! | other        | model                                    |
//!
//! Engine failures become diagnostics at the stage boundary. Orchestration
//! failures ([`PipelineError`]) are logged and fail the stage without a
//! diagnostic. The root walk and source discovery touch the filesystem
//! synchronously and run on the blocking pool.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stencil_types::{
    CacheSettings, Diagnostic, Failure, PackageLayout, Range, SourceKind, Stage,
};
use url::Url;

use crate::aggregator::{DiagnosticAggregator, DiagnosticsPublisher};
use crate::cache::{CompiledState, LogicCache, PassTicket, RootHandle};
use crate::discovery::{self, DiscoveryError, SourceDiscovery, SourceSet};
use crate::extract::{ErrorLocationExtractor, PassContext};
use crate::protocol::PathToUriError;
use crate::root::RootResolver;
use crate::toolchain::{ModelRegistry, Template, Toolchain};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document URI is not a file URI: {uri}")]
    NotAFileUri { uri: Url },
    #[error(transparent)]
    PathToUri(#[from] PathToUriError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("invalid verbose file pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("blocking filesystem task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

/// Run synchronous filesystem work off the async worker threads.
async fn off_runtime<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

/// A changed document with its live editor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Url,
    pub text: String,
}

impl TextDocument {
    #[must_use]
    pub fn new(uri: Url, text: impl Into<String>) -> Self {
        Self {
            uri,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageResult {
    pub stage: Stage,
    pub passed: bool,
}

/// A pass that ran to its end, with the diagnostics it collected.
#[derive(Debug)]
pub struct CompletedPass {
    root: Option<PathBuf>,
    stages: Vec<StageResult>,
    diagnostics: DiagnosticAggregator,
}

impl CompletedPass {
    /// `None` when no enclosing package was found.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    #[must_use]
    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    #[must_use]
    pub fn ran(&self, stage: Stage) -> bool {
        self.stages.iter().any(|s| s.stage == stage)
    }

    #[must_use]
    pub fn passed(&self, stage: Stage) -> bool {
        self.stages.iter().any(|s| s.stage == stage && s.passed)
    }

    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticAggregator {
        &self.diagnostics
    }

    #[must_use]
    pub fn into_diagnostics(self) -> DiagnosticAggregator {
        self.diagnostics
    }

    pub fn flush(self, publisher: &dyn DiagnosticsPublisher) {
        self.diagnostics.flush(publisher);
    }
}

#[derive(Debug)]
pub enum PassOutcome {
    Completed(CompletedPass),
    /// A newer pass for the same root took over; nothing is flushed.
    Superseded,
}

impl PassOutcome {
    /// Publish the pass's diagnostics. Returns `false` for a superseded pass.
    pub fn flush(self, publisher: &dyn DiagnosticsPublisher) -> bool {
        match self {
            PassOutcome::Completed(pass) => {
                pass.flush(publisher);
                true
            }
            PassOutcome::Superseded => false,
        }
    }

    #[must_use]
    pub fn completed(self) -> Option<CompletedPass> {
        match self {
            PassOutcome::Completed(pass) => Some(pass),
            PassOutcome::Superseded => None,
        }
    }
}

/// Mutable state of one in-flight pass.
struct Pass<'a> {
    document: &'a TextDocument,
    path: PathBuf,
    kind: SourceKind,
    root: PathBuf,
    diagnostics: DiagnosticAggregator,
    stages: Vec<StageResult>,
}

impl Pass<'_> {
    fn cx(&self) -> PassContext<'_> {
        PassContext {
            document_uri: &self.document.uri,
            document_path: &self.path,
            root: Some(&self.root),
        }
    }

    fn mark_valid(&mut self, path: &Path) -> Result<(), PathToUriError> {
        let uri = self.cx().uri_for(path)?;
        self.diagnostics.mark_valid(uri);
        Ok(())
    }

    fn report(&mut self, extractor: &ErrorLocationExtractor, failure: &Failure, stage: Stage) {
        tracing::debug!(%stage, ?failure, "Stage failure");
        let range = extractor.extract_range(failure);
        let uri = extractor.attribute_file(failure, &self.cx());
        self.diagnostics
            .add(uri, Diagnostic::error(range, failure.message(), stage));
    }

    /// Live editor text for the changed file, disk contents for the rest.
    async fn read_source(&self, path: &Path) -> Result<Cow<'_, str>, Failure> {
        if path == self.path {
            tracing::trace!(path = %path.display(), "Using live document text");
            return Ok(Cow::Borrowed(&self.document.text));
        }
        tokio::fs::read_to_string(path)
            .await
            .map(Cow::Owned)
            .map_err(|e| Failure::from_io(path, &e))
    }

    fn record(&mut self, stage: Stage, result: Result<bool, PipelineError>) -> bool {
        let passed = result.unwrap_or_else(|e| {
            tracing::error!(root = %self.root.display(), %stage, "Stage aborted: {e}");
            false
        });
        self.stages.push(StageResult { stage, passed });
        passed
    }

    fn complete(self) -> PassOutcome {
        PassOutcome::Completed(CompletedPass {
            root: Some(self.root),
            stages: self.stages,
            diagnostics: self.diagnostics,
        })
    }
}

fn still_current(handle: &RootHandle, ticket: &PassTicket, uri: &Url) -> bool {
    let current = handle.is_current(ticket);
    if !current {
        tracing::debug!(%uri, root = %handle.root().display(), "Pass superseded by a newer edit");
    }
    current
}

pub struct ValidationPipeline {
    layout: PackageLayout,
    toolchain: Arc<dyn Toolchain>,
    cache: LogicCache,
    resolver: Arc<RootResolver>,
    extractor: ErrorLocationExtractor,
    discovery: Arc<SourceDiscovery>,
}

impl ValidationPipeline {
    pub fn new(
        layout: PackageLayout,
        cache: CacheSettings,
        toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            resolver: Arc::new(RootResolver::new(&layout)),
            extractor: ErrorLocationExtractor::new(layout.logic_extension())?,
            discovery: Arc::new(SourceDiscovery::new(&layout)?),
            cache: LogicCache::new(cache),
            toolchain,
            layout,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &PackageLayout {
        &self.layout
    }

    #[must_use]
    pub fn cache(&self) -> &LogicCache {
        &self.cache
    }

    /// Run one validation pass for `document`.
    pub async fn validate(&self, document: &TextDocument) -> Result<PassOutcome, PipelineError> {
        let path = document
            .uri
            .to_file_path()
            .map_err(|()| PipelineError::NotAFileUri {
                uri: document.uri.clone(),
            })?;
        tracing::info!(uri = %document.uri, "Validating document");

        let resolver = Arc::clone(&self.resolver);
        let lookup = path.clone();
        let root = match off_runtime(move || resolver.resolve(&lookup)).await? {
            Ok(root) => root,
            Err(not_found) => {
                let mut diagnostics = DiagnosticAggregator::new();
                diagnostics.add(
                    document.uri.clone(),
                    Diagnostic::error(Range::DOCUMENT_START, not_found.to_string(), Stage::Template),
                );
                return Ok(PassOutcome::Completed(CompletedPass {
                    root: None,
                    stages: Vec::new(),
                    diagnostics,
                }));
            }
        };

        let handle = self
            .cache
            .get_or_create(&root, self.toolchain.as_ref())
            .await;
        let ticket = handle.issue_ticket(&document.uri);
        let mut state = handle.lock().await;
        if !still_current(&handle, &ticket, &document.uri) {
            return Ok(PassOutcome::Superseded);
        }

        let mut pass = Pass {
            document,
            kind: self.layout.classify(&path),
            path,
            root,
            diagnostics: DiagnosticAggregator::new(),
            stages: Vec::new(),
        };

        let result = self.model_stage(&mut pass, &mut state).await;
        if !pass.record(Stage::Model, result) {
            return Ok(pass.complete());
        }

        if matches!(pass.kind, SourceKind::Model | SourceKind::Logic) {
            if !still_current(&handle, &ticket, &document.uri) {
                return Ok(PassOutcome::Superseded);
            }
            let result = self.logic_stage(&mut pass, &mut state).await;
            if !pass.record(Stage::Logic, result) || pass.kind == SourceKind::Logic {
                return Ok(pass.complete());
            }
        }

        if matches!(pass.kind, SourceKind::Model | SourceKind::Grammar) {
            if !still_current(&handle, &ticket, &document.uri) {
                return Ok(PassOutcome::Superseded);
            }
            let template = match self.template_stage(&mut pass).await {
                Ok(template) => template,
                Err(e) => {
                    pass.record(Stage::Template, Err(e));
                    return Ok(pass.complete());
                }
            };
            pass.record(Stage::Template, Ok(template.is_some()));
            let Some(template) = template else {
                return Ok(pass.complete());
            };

            if !still_current(&handle, &ticket, &document.uri) {
                return Ok(PassOutcome::Superseded);
            }
            let result = self.sample_stage(&mut pass, &*template).await;
            pass.record(Stage::Sample, result);
        }

        Ok(pass.complete())
    }

    async fn find_sources(
        &self,
        dirs: Vec<PathBuf>,
        set: SourceSet,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let discovery = Arc::clone(&self.discovery);
        off_runtime(move || discovery.find(&dirs, set)).await
    }

    async fn model_stage(
        &self,
        pass: &mut Pass<'_>,
        state: &mut CompiledState,
    ) -> Result<bool, PipelineError> {
        tracing::debug!(root = %pass.root.display(), stage = %Stage::Model, "Running stage");
        state.models.clear();

        let dirs = discovery::scan_dirs(&pass.path, self.layout.models_dir(&pass.root));
        for file in self.find_sources(dirs, SourceSet::Models).await? {
            pass.mark_valid(&file)?;
            if let Err(failure) = load_model(pass, &mut *state.models, &file).await {
                pass.report(&self.extractor, &failure, Stage::Model);
                return Ok(false);
            }
        }

        if let Err(failure) = state.models.resolve_external_dependencies().await {
            pass.report(&self.extractor, &failure, Stage::Model);
            return Ok(false);
        }
        Ok(true)
    }

    async fn logic_stage(
        &self,
        pass: &mut Pass<'_>,
        state: &mut CompiledState,
    ) -> Result<bool, PipelineError> {
        tracing::debug!(root = %pass.root.display(), stage = %Stage::Logic, "Running stage");
        let CompiledState { models, logic } = state;

        for unit in logic.unit_paths() {
            if unit != pass.path && matches!(tokio::fs::try_exists(&unit).await, Ok(false)) {
                tracing::debug!(unit = %unit.display(), "Removing logic unit for deleted file");
                logic.remove_unit(&unit);
            }
        }

        let dirs = discovery::scan_dirs(&pass.path, self.layout.logic_dir(&pass.root));
        for file in self.find_sources(dirs, SourceSet::Logic).await? {
            pass.mark_valid(&file)?;
            let updated = match pass.read_source(&file).await {
                Ok(content) => logic.update_unit(&content, &file),
                Err(failure) => Err(failure),
            };
            if let Err(failure) = updated {
                pass.report(&self.extractor, &failure, Stage::Logic);
                return Ok(false);
            }
        }

        if let Err(failure) = logic.compile(&**models, true).await {
            pass.report(&self.extractor, &failure, Stage::Logic);
            return Ok(false);
        }
        Ok(true)
    }

    /// Returns the validated template, or `None` after reporting its failure.
    async fn template_stage(
        &self,
        pass: &mut Pass<'_>,
    ) -> Result<Option<Box<dyn Template>>, PipelineError> {
        tracing::debug!(root = %pass.root.display(), stage = %Stage::Template, "Running stage");
        let grammar_path = self.layout.grammar_file(&pass.root);
        pass.mark_valid(&grammar_path)?;

        let live_grammar = (pass.kind == SourceKind::Grammar).then_some(pass.document.text.as_str());
        match self.build_template(&pass.root, live_grammar).await {
            Ok(template) => {
                tracing::debug!(identifier = %template.identifier(), "Built template");
                Ok(Some(template))
            }
            Err(failure) => {
                pass.report(&self.extractor, &failure.with_file(grammar_path), Stage::Template);
                Ok(None)
            }
        }
    }

    async fn build_template(
        &self,
        root: &Path,
        live_grammar: Option<&str>,
    ) -> Result<Box<dyn Template>, Failure> {
        let mut template = self.toolchain.load_template(root).await?;
        if let Some(grammar) = live_grammar {
            template.build_grammar(grammar)?;
        }
        template.validate()?;
        Ok(template)
    }

    async fn sample_stage(
        &self,
        pass: &mut Pass<'_>,
        template: &dyn Template,
    ) -> Result<bool, PipelineError> {
        tracing::debug!(root = %pass.root.display(), stage = %Stage::Sample, "Running stage");
        let sample_path = self.layout.sample_file(&pass.root);
        pass.mark_valid(&sample_path)?;

        match parse_sample(template, &sample_path).await {
            Ok(data) => {
                match serde_json::to_string_pretty(&data) {
                    Ok(json) => tracing::debug!("Parsed sample: {json}"),
                    Err(e) => tracing::debug!("Parsed sample, data not printable: {e}"),
                }
                Ok(true)
            }
            Err(failure) => {
                pass.report(&self.extractor, &failure.with_file(sample_path), Stage::Sample);
                Ok(false)
            }
        }
    }
}

async fn load_model(
    pass: &Pass<'_>,
    models: &mut dyn ModelRegistry,
    file: &Path,
) -> Result<(), Failure> {
    let content = pass.read_source(file).await?;
    let namespace = models.namespace_of(&content, file)?;
    if models.has_namespace(&namespace) {
        models.update(&content, file)
    } else {
        models.add(&content, file)
    }
}

async fn parse_sample(template: &dyn Template, path: &Path) -> Result<serde_json::Value, Failure> {
    let sample = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Failure::from_io(path, &e))?;
    let mut clause = template.new_clause();
    clause.parse(&sample)?;
    Ok(clause.data())
}
