//! Seams to the external compilation engines.
//!
//! The model compiler, the logic compiler and the template engine are not
//! part of this crate. Adapters implement these traits and translate native
//! errors into [`Failure`] values; nothing an engine reports escapes a stage
//! as a Rust error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use stencil_types::Failure;

/// Boxed future returned by engine operations that may suspend.
pub type EngineFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, Failure>> + Send + 'a>>;

/// The loaded data-model definitions of one package, keyed by namespace.
pub trait ModelRegistry: Send + Sync {
    /// Drop every loaded definition.
    fn clear(&mut self);

    /// Parse just enough of `content` to report the namespace it declares.
    fn namespace_of(&self, content: &str, path: &Path) -> Result<String, Failure>;

    fn has_namespace(&self, namespace: &str) -> bool;

    fn add(&mut self, content: &str, path: &Path) -> Result<(), Failure>;

    /// Replace the definition registered under the same namespace.
    fn update(&mut self, content: &str, path: &Path) -> Result<(), Failure>;

    /// Fetch models the loaded definitions import from other packages.
    ///
    /// May perform network I/O.
    fn resolve_external_dependencies(&mut self) -> EngineFut<'_, ()>;
}

/// Business-logic source units of one package, updated incrementally.
pub trait LogicRegistry: Send + Sync {
    /// Add the unit for `path`, or replace it.
    fn update_unit(&mut self, content: &str, path: &Path) -> Result<(), Failure>;

    fn remove_unit(&mut self, path: &Path);

    fn unit_paths(&self) -> Vec<PathBuf>;

    /// Compile every unit against `models`.
    fn compile<'a>(&'a mut self, models: &'a dyn ModelRegistry, strict: bool) -> EngineFut<'a, ()>;
}

/// A template assembled from a package directory.
pub trait Template: Send + Sync {
    fn identifier(&self) -> String;

    /// Rebuild the grammar from live grammar text.
    fn build_grammar(&mut self, grammar: &str) -> Result<(), Failure>;

    /// Check the grammar against the package's models and logic.
    fn validate(&self) -> Result<(), Failure>;

    fn new_clause(&self) -> Box<dyn Clause + '_>;
}

/// An instance of a template, filled in by parsing sample text.
pub trait Clause: Send {
    fn parse(&mut self, content: &str) -> Result<(), Failure>;

    /// The data extracted by the last successful parse.
    fn data(&self) -> serde_json::Value;
}

/// Factory for the engines behind one server process.
pub trait Toolchain: Send + Sync {
    fn new_model_registry(&self) -> Box<dyn ModelRegistry>;

    fn new_logic_registry(&self) -> Box<dyn LogicRegistry>;

    /// Load the full template for `root`, re-reading its metadata from disk.
    fn load_template<'a>(&'a self, root: &'a Path) -> EngineFut<'a, Box<dyn Template>>;
}
