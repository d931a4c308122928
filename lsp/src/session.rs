//! The editor session: JSON-RPC over any async byte stream.
//!
//! The session owns the open-document store and the validation pipeline.
//! Each change spawns a pass on the runtime; passes for one package root are
//! serialized by the pipeline itself. Every outgoing frame goes through a
//! single writer task.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stencil_config::StencilConfig;
use stencil_types::{CacheSettings, Diagnostic, PackageLayout, SessionSettings};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

use crate::aggregator::DiagnosticsPublisher;
use crate::codec::{FrameReader, FrameWriter};
use crate::pipeline::{TextDocument, ValidationPipeline};
use crate::protocol::{
    self, DidChangeParams, DidChangeWorkspaceFoldersParams, DidCloseParams, DidOpenParams,
    IncomingFrame, InitializationOptions, InitializeParams, Notification, Response,
};
use crate::toolchain::Toolchain;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// What the read loop does after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

fn enqueue(tx: &mpsc::UnboundedSender<WriterCommand>, msg: &impl Serialize) {
    match serde_json::to_value(msg) {
        Ok(frame) => {
            if tx.send(WriterCommand::Send(frame)).is_err() {
                tracing::debug!("Writer task gone, dropping outgoing frame");
            }
        }
        Err(e) => tracing::warn!("Failed to serialize outgoing frame: {e}"),
    }
}

/// Publishes diagnostics as `textDocument/publishDiagnostics` notifications.
struct ChannelPublisher {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl DiagnosticsPublisher for ChannelPublisher {
    fn publish(&self, uri: &Url, diagnostics: &[Diagnostic]) {
        let params = protocol::publish_diagnostics_params(uri, diagnostics);
        enqueue(
            &self.tx,
            &Notification::new("textDocument/publishDiagnostics", Some(params)),
        );
    }
}

/// A language server session, configured but not yet connected.
pub struct Session {
    toolchain: Arc<dyn Toolchain>,
    config: StencilConfig,
}

impl Session {
    #[must_use]
    pub fn new(toolchain: Arc<dyn Toolchain>, config: StencilConfig) -> Self {
        Self { toolchain, config }
    }

    /// Build a session from the config file at its resolved location.
    ///
    /// A missing file yields the default config.
    pub fn from_config_file(
        toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self, stencil_config::ConfigError> {
        let config = StencilConfig::load()?.unwrap_or_default();
        Ok(Self::new(toolchain, config))
    }

    /// Serve one client until `exit` or end of input.
    ///
    /// In-flight validation passes are awaited before returning, so their
    /// diagnostics reach the client.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Client write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let mut state = SessionState {
            publisher: Arc::new(ChannelPublisher {
                tx: writer_tx.clone(),
            }),
            writer_tx,
            toolchain: self.toolchain,
            layout: self.config.layout,
            cache: self.config.cache,
            settings: self.config.session,
            pipeline: None,
            documents: HashMap::new(),
            workspace_folders: Vec::new(),
            passes: JoinSet::new(),
            shutdown_requested: false,
        };

        let mut reader = FrameReader::new(reader);
        let result = loop {
            state.reap_passes();
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if state.handle_frame(&frame) == Flow::Exit {
                        break Ok(());
                    }
                }
                Ok(None) => {
                    tracing::info!("Client closed the connection");
                    break Ok(());
                }
                Err(e) => {
                    tracing::warn!("Client read error: {e:#}");
                    break Err(e);
                }
            }
        };

        state.finish().await;
        if let Err(e) = writer_task.await {
            tracing::warn!("Writer task failed: {e}");
        }
        result
    }
}

struct SessionState {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    publisher: Arc<ChannelPublisher>,
    toolchain: Arc<dyn Toolchain>,
    layout: PackageLayout,
    cache: CacheSettings,
    settings: SessionSettings,
    /// Built at `initialize`; notifications before that are dropped.
    pipeline: Option<Arc<ValidationPipeline>>,
    documents: HashMap<Url, String>,
    workspace_folders: Vec<Url>,
    passes: JoinSet<()>,
    shutdown_requested: bool,
}

impl SessionState {
    fn handle_frame(&mut self, frame: &serde_json::Value) -> Flow {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return Flow::Continue;
        };

        match incoming {
            IncomingFrame::Request { id, method, params } => {
                let response = self.handle_request(id, &method, params);
                enqueue(&self.writer_tx, &response);
                Flow::Continue
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params)
            }
            IncomingFrame::Response => {
                tracing::trace!("Ignoring response from client");
                Flow::Continue
            }
        }
    }

    fn handle_request(
        &mut self,
        id: serde_json::Value,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Response {
        if self.shutdown_requested {
            return Response::error(
                id,
                protocol::INVALID_REQUEST,
                format!("Server is shutting down, rejecting {method}"),
            );
        }

        match method {
            "initialize" => match self.initialize(params) {
                Ok(result) => Response::ok(id, result),
                Err((code, message)) => Response::error(id, code, message),
            },
            "shutdown" => {
                tracing::info!("Shutdown requested");
                self.shutdown_requested = true;
                Response::ok(id, serde_json::Value::Null)
            }
            _ => {
                tracing::debug!("Client sent unsupported request: {method}");
                Response::error(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                )
            }
        }
    }

    fn initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, (i64, String)> {
        if self.pipeline.is_some() {
            return Err((protocol::INVALID_REQUEST, "Server already initialized".to_string()));
        }

        let params: InitializeParams = decode(params)
            .map_err(|e| (protocol::INVALID_PARAMS, format!("Invalid initialize params: {e}")))?;
        let options: InitializationOptions = decode(params.initialization_options)
            .map_err(|e| (protocol::INVALID_PARAMS, format!("Invalid initializationOptions: {e}")))?;
        if let Some(layout) = options.layout {
            self.layout = layout;
        }
        if let Some(settings) = options.session {
            self.settings = settings;
        }

        self.workspace_folders = match params.workspace_folders {
            Some(folders) => folders.iter().filter_map(|f| parse_uri(&f.uri)).collect(),
            None => params.root_uri.as_deref().and_then(parse_uri).into_iter().collect(),
        };

        let pipeline = ValidationPipeline::new(
            self.layout.clone(),
            self.cache,
            Arc::clone(&self.toolchain),
        )
        .map_err(|e| (protocol::INVALID_PARAMS, e.to_string()))?;
        self.pipeline = Some(Arc::new(pipeline));

        tracing::info!(
            folders = ?self.workspace_folders.iter().map(Url::as_str).collect::<Vec<_>>(),
            "Started and initialize received"
        );
        Ok(protocol::initialize_result())
    }

    fn handle_notification(&mut self, method: &str, params: Option<serde_json::Value>) -> Flow {
        match method {
            "exit" => {
                tracing::info!(clean = self.shutdown_requested, "Exit received");
                return Flow::Exit;
            }
            "initialized" => tracing::debug!("Client initialized"),
            "textDocument/didOpen" => {
                if let Some(p) = notification_params::<DidOpenParams>(method, params)
                    && let Some(uri) = parse_uri(&p.text_document.uri)
                {
                    tracing::info!(%uri, "Document opened");
                    self.documents.insert(uri.clone(), p.text_document.text);
                    self.schedule_validation(&uri);
                }
            }
            "textDocument/didChange" => {
                if let Some(p) = notification_params::<DidChangeParams>(method, params)
                    && let Some(uri) = parse_uri(&p.text_document.uri)
                    && let Some(change) = p.content_changes.into_iter().last()
                {
                    self.documents.insert(uri.clone(), change.text);
                    self.schedule_validation(&uri);
                }
            }
            "textDocument/didClose" => {
                if let Some(p) = notification_params::<DidCloseParams>(method, params)
                    && let Some(uri) = parse_uri(&p.text_document.uri)
                {
                    tracing::debug!(%uri, "Document closed");
                    self.documents.remove(&uri);
                }
            }
            "workspace/didChangeWorkspaceFolders" => {
                if let Some(p) = notification_params::<DidChangeWorkspaceFoldersParams>(method, params) {
                    self.change_workspace_folders(p);
                }
            }
            _ => tracing::trace!("Ignoring notification: {method}"),
        }
        Flow::Continue
    }

    /// Spawn a pass for `uri`, or for every open document when configured to.
    fn schedule_validation(&mut self, uri: &Url) {
        let Some(pipeline) = self.pipeline.clone() else {
            tracing::warn!(%uri, "Ignoring document change before initialize");
            return;
        };

        let documents: Vec<TextDocument> = if self.settings.revalidate_open_documents {
            let mut all: Vec<TextDocument> = self
                .documents
                .iter()
                .map(|(uri, text)| TextDocument::new(uri.clone(), text.clone()))
                .collect();
            all.sort_by(|a, b| a.uri.cmp(&b.uri));
            all
        } else {
            self.documents
                .get(uri)
                .map(|text| TextDocument::new(uri.clone(), text.clone()))
                .into_iter()
                .collect()
        };

        let publisher = Arc::clone(&self.publisher);
        self.passes.spawn(async move {
            for document in documents {
                match pipeline.validate(&document).await {
                    Ok(outcome) => {
                        outcome.flush(&*publisher);
                    }
                    Err(e) => {
                        tracing::error!(uri = %document.uri, "Validation pass failed: {e}");
                    }
                }
            }
        });
    }

    fn change_workspace_folders(&mut self, params: DidChangeWorkspaceFoldersParams) {
        let removed: Vec<Url> = params
            .event
            .removed
            .iter()
            .filter_map(|f| parse_uri(&f.uri))
            .collect();
        self.workspace_folders.retain(|f| !removed.contains(f));
        self.workspace_folders.extend(
            params
                .event
                .added
                .iter()
                .filter_map(|f| parse_uri(&f.uri)),
        );

        let Some(pipeline) = self.pipeline.clone() else {
            return;
        };
        let folders: Vec<_> = removed.iter().filter_map(|u| u.to_file_path().ok()).collect();
        if folders.is_empty() {
            return;
        }
        self.passes.spawn(async move {
            for folder in folders {
                let evicted = pipeline.cache().evict_under(&folder).await;
                tracing::info!(folder = %folder.display(), evicted, "Workspace folder removed");
            }
        });
    }

    fn reap_passes(&mut self) {
        while let Some(result) = self.passes.try_join_next() {
            if let Err(e) = result {
                tracing::error!("Validation task failed: {e}");
            }
        }
    }

    /// Wait for in-flight passes, then stop the writer.
    async fn finish(&mut self) {
        while let Some(result) = self.passes.join_next().await {
            if let Err(e) = result {
                tracing::error!("Validation task failed: {e}");
            }
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
    }
}

/// Absent or `null` params decode to the type's default.
fn decode<T: DeserializeOwned + Default>(params: Option<serde_json::Value>) -> serde_json::Result<T> {
    match params {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value),
    }
}

fn notification_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Option<T> {
    let Some(params) = params else {
        tracing::warn!("Missing {method} params");
        return None;
    };
    match serde_json::from_value(params) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!("Invalid {method} params: {e}");
            None
        }
    }
}

fn parse_uri(uri: &str) -> Option<Url> {
    match Url::parse(uri) {
        Ok(uri) => Some(uri),
        Err(e) => {
            tracing::warn!("Ignoring invalid URI {uri:?}: {e}");
            None
        }
    }
}
