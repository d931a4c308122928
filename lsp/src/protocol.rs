//! LSP message serde types for the server side of JSON-RPC.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stencil_types::{Diagnostic, PackageLayout, SessionSettings};
use url::Url;

/// JSON-RPC error code for an unsupported request.
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code for a request sent after `shutdown`.
pub(crate) const INVALID_REQUEST: i64 = -32600;

pub(crate) const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// A reply to a client request: exactly one of `result` or `error`.
#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// A frame received from the client.
#[derive(Debug)]
pub(crate) enum IncomingFrame {
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// Replies to server-initiated requests; the server sends none, so these are dropped.
    Response,
}

pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let params = frame.get("params").cloned();

    match (id, method) {
        (Some(id), Some(method)) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification { method, params }),
        (Some(_), None) if frame.get("result").is_some() || frame.get("error").is_some() => {
            Some(IncomingFrame::Response)
        }
        _ => None,
    }
}

pub(crate) fn initialize_result() -> serde_json::Value {
    serde_json::json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 1
            }
        },
        "serverInfo": {
            "name": "stencil-lsp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub(crate) fn publish_diagnostics_params(uri: &Url, diagnostics: &[Diagnostic]) -> serde_json::Value {
    serde_json::json!({
        "uri": uri.as_str(),
        "diagnostics": diagnostics
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    #[serde(default)]
    pub root_uri: Option<String>,
    #[serde(default)]
    pub workspace_folders: Option<Vec<WorkspaceFolder>>,
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

/// Client overrides for the `[layout]` and `[session]` config sections.
///
/// A section given here replaces the configured one wholesale.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct InitializationOptions {
    #[serde(default)]
    pub layout: Option<PackageLayout>,
    #[serde(default)]
    pub session: Option<SessionSettings>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceFolder {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentItem {
    pub uri: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidChangeParams {
    pub text_document: TextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DidCloseParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextDocumentIdentifier {
    pub uri: String,
}

/// Full-sync change: the whole document text.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentChange {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DidChangeWorkspaceFoldersParams {
    pub event: WorkspaceFoldersChange,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkspaceFoldersChange {
    #[serde(default)]
    pub added: Vec<WorkspaceFolder>,
    #[serde(default)]
    pub removed: Vec<WorkspaceFolder>,
}

pub fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
