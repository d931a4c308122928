//! Shared test utilities and fixtures
//!
//! A scripted toolchain that understands a toy package format, and a
//! tempfile-backed package builder.
//!
//! Toy format:
//! - models: `namespace <ns>` on the first line, then `concept <Name>` and
//!   `import <ns>` lines;
//! - logic: `import <ns>` lines must name a loaded model namespace;
//! - grammar: `{{Name}}` placeholders must name a concept on disk;
//! - sample: any text, rejected when a line contains `INVALID`;
//! - everywhere: a line containing `SYNTAX ERROR` is a parse error.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use stencil_lsp::{
    Clause, EngineFut, LogicRegistry, ModelRegistry, Template, TextDocument, Toolchain,
};
use stencil_types::{DescriptorKind, DescriptorPos, Failure, SourcePos};
use tokio::sync::{Notify, Semaphore};
use url::Url;

pub const MANIFEST: &str = r#"{"name": "helloworld", "version": "0.1.0", "accordproject": {"template": "clause"}}"#;
pub const MODEL: &str = "namespace org.test\n\nconcept Greeting\nconcept Person\n";
pub const LOGIC: &str = "namespace org.test.logic\n\nimport org.test\n\ncontract HelloWorld {}\n";
pub const GRAMMAR: &str = "Hello {{Person}}, {{Greeting}}!\n";
pub const SAMPLE: &str = "Hello Fred, welcome!\n";

/// An engine operation, in the order the pipeline invoked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    NewRegistry,
    ClearModels,
    AddModel(PathBuf),
    UpdateModel(PathBuf),
    ResolveExternal,
    UpdateUnit(PathBuf),
    RemoveUnit(PathBuf),
    Compile,
    LoadTemplate(PathBuf),
    BuildGrammar,
    ValidateTemplate,
    ParseSample,
}

#[derive(Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<Op>>>);

impl OpLog {
    fn push(&self, op: Op) {
        self.0.lock().unwrap().push(op);
    }

    pub fn all(&self) -> Vec<Op> {
        self.0.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn count(&self, op: &Op) -> usize {
        self.0.lock().unwrap().iter().filter(|o| *o == op).count()
    }

    pub fn any(&self, pred: impl Fn(&Op) -> bool) -> bool {
        self.0.lock().unwrap().iter().any(pred)
    }
}

/// Blocks external dependency resolution until released.
#[derive(Clone)]
pub struct Gate {
    pub reached: Arc<Notify>,
    pub release: Arc<Semaphore>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.release.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[derive(Clone, Default)]
pub struct FakeToolchain {
    pub ops: OpLog,
    pub gate: Option<Gate>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Gate) -> Self {
        Self {
            ops: OpLog::default(),
            gate: Some(gate),
        }
    }
}

fn syntax_error_line(content: &str) -> Option<u32> {
    content
        .lines()
        .position(|l| l.contains("SYNTAX ERROR"))
        .map(|i| u32::try_from(i + 1).unwrap())
}

fn prefixed<'a>(content: &'a str, keyword: &'a str) -> impl Iterator<Item = (u32, &'a str)> + 'a {
    content.lines().enumerate().filter_map(move |(i, line)| {
        line.trim()
            .strip_prefix(keyword)
            .map(|rest| (u32::try_from(i + 1).unwrap(), rest.trim()))
    })
}

struct ModelEntry {
    path: PathBuf,
    content: String,
}

struct FakeModels {
    ops: OpLog,
    gate: Option<Gate>,
    by_namespace: BTreeMap<String, ModelEntry>,
}

impl FakeModels {
    fn parse(&self, content: &str, path: &Path) -> Result<String, Failure> {
        if let Some(line) = syntax_error_line(content) {
            return Err(Failure::new("Unexpected token 'SYNTAX'")
                .at_file_location(SourcePos::new(line, 0), SourcePos::new(line, 6))
                .with_file(path));
        }
        self.namespace_of(content, path)
    }
}

impl ModelRegistry for FakeModels {
    fn clear(&mut self) {
        self.ops.push(Op::ClearModels);
        self.by_namespace.clear();
    }

    fn namespace_of(&self, content: &str, path: &Path) -> Result<String, Failure> {
        prefixed(content, "namespace ")
            .next()
            .map(|(_, ns)| ns.to_string())
            .ok_or_else(|| {
                Failure::new("Expected namespace declaration")
                    .with_model_file(path.display().to_string())
            })
    }

    fn has_namespace(&self, namespace: &str) -> bool {
        self.by_namespace.contains_key(namespace)
    }

    fn add(&mut self, content: &str, path: &Path) -> Result<(), Failure> {
        self.ops.push(Op::AddModel(path.to_path_buf()));
        let namespace = self.parse(content, path)?;
        if self.by_namespace.contains_key(&namespace) {
            return Err(Failure::new(format!("Namespace {namespace} is already declared")));
        }
        self.by_namespace.insert(
            namespace,
            ModelEntry {
                path: path.to_path_buf(),
                content: content.to_string(),
            },
        );
        Ok(())
    }

    fn update(&mut self, content: &str, path: &Path) -> Result<(), Failure> {
        self.ops.push(Op::UpdateModel(path.to_path_buf()));
        let namespace = self.parse(content, path)?;
        let Some(entry) = self.by_namespace.get_mut(&namespace) else {
            return Err(Failure::new(format!("Namespace {namespace} is not declared")));
        };
        entry.path = path.to_path_buf();
        entry.content = content.to_string();
        Ok(())
    }

    fn resolve_external_dependencies(&mut self) -> EngineFut<'_, ()> {
        Box::pin(async move {
            self.ops.push(Op::ResolveExternal);
            if let Some(gate) = &self.gate {
                gate.reached.notify_one();
                gate.release.acquire().await.unwrap().forget();
            }
            for entry in self.by_namespace.values() {
                for (_, import) in prefixed(&entry.content, "import ") {
                    if !self.by_namespace.contains_key(import) {
                        return Err(Failure::new(format!("Unable to resolve import {import}"))
                            .with_model_file(entry.path.display().to_string()));
                    }
                }
            }
            Ok(())
        })
    }
}

struct FakeLogic {
    ops: OpLog,
    units: BTreeMap<PathBuf, String>,
}

impl LogicRegistry for FakeLogic {
    fn update_unit(&mut self, content: &str, path: &Path) -> Result<(), Failure> {
        self.ops.push(Op::UpdateUnit(path.to_path_buf()));
        self.units.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn remove_unit(&mut self, path: &Path) {
        self.ops.push(Op::RemoveUnit(path.to_path_buf()));
        self.units.remove(path);
    }

    fn unit_paths(&self) -> Vec<PathBuf> {
        self.units.keys().cloned().collect()
    }

    fn compile<'a>(&'a mut self, models: &'a dyn ModelRegistry, _strict: bool) -> EngineFut<'a, ()> {
        Box::pin(async move {
            self.ops.push(Op::Compile);
            for (path, content) in &self.units {
                if let Some(line) = syntax_error_line(content) {
                    return Err(Failure::new("Parse error (at 'SYNTAX')").with_descriptor(
                        DescriptorKind::CompilationError,
                        Some(DescriptorPos::new(line, 4)),
                        None,
                        Some(format!(
                            "Parse error (at file {} line {line} col 4). \n{}",
                            path.display(),
                            content.lines().nth(line as usize - 1).unwrap_or_default()
                        )),
                    ));
                }
                for (line, import) in prefixed(content, "import ") {
                    if !models.has_namespace(import) {
                        return Err(Failure::new(format!("Import not found: {import}")).with_descriptor(
                            DescriptorKind::TypeError,
                            Some(DescriptorPos::new(line, 0)),
                            Some(DescriptorPos::new(line, 7 + u32::try_from(import.len()).unwrap())),
                            Some(format!("Type error (at file {} line {line} col 0). ", path.display())),
                        ));
                    }
                }
            }
            Ok(())
        })
    }
}

struct FakeTemplate {
    ops: OpLog,
    root: PathBuf,
    grammar: String,
    concepts: Vec<String>,
}

fn placeholders(grammar: &str) -> Vec<(u32, u32, String)> {
    let mut found = Vec::new();
    for (i, line) in grammar.lines().enumerate() {
        let mut rest = line;
        let mut offset = 0;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let name = rest[start + 2..start + len].to_string();
            found.push((
                u32::try_from(i + 1).unwrap(),
                u32::try_from(offset + start).unwrap(),
                name,
            ));
            offset += start + len + 2;
            rest = &rest[start + len + 2..];
        }
    }
    found
}

impl Template for FakeTemplate {
    fn identifier(&self) -> String {
        format!(
            "{}@0.1.0",
            self.root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        )
    }

    fn build_grammar(&mut self, grammar: &str) -> Result<(), Failure> {
        self.ops.push(Op::BuildGrammar);
        if let Some(line) = syntax_error_line(grammar) {
            return Err(Failure::new("Invalid grammar")
                .at_file_location(SourcePos::new(line, 0), SourcePos::new(line, 12)));
        }
        self.grammar = grammar.to_string();
        Ok(())
    }

    fn validate(&self) -> Result<(), Failure> {
        self.ops.push(Op::ValidateTemplate);
        for (line, column, name) in placeholders(&self.grammar) {
            if !self.concepts.contains(&name) {
                return Err(Failure::new(format!("Type {name} not found"))
                    .at_file_location(
                        SourcePos::new(line, column),
                        SourcePos::new(line, column + 4 + u32::try_from(name.len()).unwrap()),
                    ));
            }
        }
        Ok(())
    }

    fn new_clause(&self) -> Box<dyn Clause + '_> {
        Box::new(FakeClause {
            template: self,
            data: serde_json::Value::Null,
        })
    }
}

struct FakeClause<'a> {
    template: &'a FakeTemplate,
    data: serde_json::Value,
}

impl Clause for FakeClause<'_> {
    fn parse(&mut self, content: &str) -> Result<(), Failure> {
        self.template.ops.push(Op::ParseSample);
        if let Some(i) = content.lines().position(|l| l.contains("INVALID")) {
            let line = u32::try_from(i + 1).unwrap();
            return Err(Failure::new("Unexpected input 'INVALID'")
                .at_file_location(SourcePos::new(line, 0), SourcePos::new(line, 7)));
        }
        self.data = serde_json::json!({
            "$class": "org.test.Greeting",
            "text": content.trim(),
        });
        Ok(())
    }

    fn data(&self) -> serde_json::Value {
        self.data.clone()
    }
}

fn concepts_on_disk(models_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(models_dir) else {
        return Vec::new();
    };
    let mut concepts = Vec::new();
    for entry in entries.flatten() {
        if entry.path().extension().is_some_and(|e| e == "cto")
            && let Ok(content) = fs::read_to_string(entry.path())
        {
            concepts.extend(prefixed(&content, "concept ").map(|(_, name)| name.to_string()));
        }
    }
    concepts
}

impl Toolchain for FakeToolchain {
    fn new_model_registry(&self) -> Box<dyn ModelRegistry> {
        self.ops.push(Op::NewRegistry);
        Box::new(FakeModels {
            ops: self.ops.clone(),
            gate: self.gate.clone(),
            by_namespace: BTreeMap::new(),
        })
    }

    fn new_logic_registry(&self) -> Box<dyn LogicRegistry> {
        Box::new(FakeLogic {
            ops: self.ops.clone(),
            units: BTreeMap::new(),
        })
    }

    fn load_template<'a>(&'a self, root: &'a Path) -> EngineFut<'a, Box<dyn Template>> {
        Box::pin(async move {
            self.ops.push(Op::LoadTemplate(root.to_path_buf()));
            let grammar_path = root.join("grammar").join("template.tem");
            let grammar = tokio::fs::read_to_string(&grammar_path)
                .await
                .map_err(|e| Failure::from_io(&grammar_path, &e))?;
            let template: Box<dyn Template> = Box::new(FakeTemplate {
                ops: self.ops.clone(),
                root: root.to_path_buf(),
                grammar,
                concepts: concepts_on_disk(&root.join("models")),
            });
            Ok(template)
        })
    }
}

/// A template package on disk.
pub struct Package {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Package {
    /// A valid package with one model, one logic file, a grammar and a sample.
    pub fn new() -> Self {
        let package = Self::empty();
        package.write("package.json", MANIFEST);
        package.write("models/model.cto", MODEL);
        package.write("lib/logic.ergo", LOGIC);
        package.write("grammar/template.tem", GRAMMAR);
        package.write("sample.txt", SAMPLE);
        package
    }

    /// A directory with no files at all.
    pub fn empty() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("stencil-test")
            .tempdir()
            .unwrap();
        let root = dir.path().join("helloworld");
        fs::create_dir_all(&root).unwrap();
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn uri(&self, rel: &str) -> Url {
        Url::from_file_path(self.path(rel)).unwrap()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    /// The document as saved on disk.
    pub fn document(&self, rel: &str) -> TextDocument {
        let text = fs::read_to_string(self.path(rel)).unwrap();
        TextDocument::new(self.uri(rel), text)
    }

    /// The document with unsaved editor text.
    pub fn edited(&self, rel: &str, text: &str) -> TextDocument {
        TextDocument::new(self.uri(rel), text)
    }
}
