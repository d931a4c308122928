//! Incremental validation for template packages, served over LSP.
//!
//! [`ValidationPipeline`] is the core: given one changed document it finds
//! the package root, reuses that root's compiled state, runs the model,
//! logic, template and sample stages in dependency order, and collects one
//! diagnostic set per touched file. [`Session`] adapts it to a JSON-RPC
//! client.

pub mod aggregator;
pub mod cache;
pub mod codec;
pub mod discovery;
pub mod extract;
pub mod pipeline;
pub mod root;
pub mod session;
pub mod toolchain;

pub(crate) mod protocol;


pub use aggregator::{DiagnosticAggregator, DiagnosticsPublisher, FileDiagnostics};
pub use cache::{CompiledState, LogicCache, RootHandle};
pub use discovery::{SourceDiscovery, SourceSet};
pub use extract::{ErrorLocationExtractor, PassContext};
pub use pipeline::{
    CompletedPass, PassOutcome, PipelineError, StageResult, TextDocument, ValidationPipeline,
};
pub use protocol::{PathToUriError, path_to_file_uri};
pub use root::{RootNotFound, RootResolver};
pub use session::Session;
pub use toolchain::{Clause, EngineFut, LogicRegistry, ModelRegistry, Template, Toolchain};
