//! End-to-end session tests over an in-memory pipe

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stencil_config::StencilConfig;
use stencil_lsp::Session;
use stencil_lsp::codec::{FrameReader, FrameWriter};
use stencil_types::{Diagnostic, Position, Range, Stage};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use url::Url;

use crate::common::{FakeToolchain, LOGIC, Op, Package};

const BROKEN_LOGIC: &str = "namespace org.test.logic\n\nSYNTAX ERROR\n";

struct Client {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Client {
    fn start(toolchain: &FakeToolchain) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let session = Session::new(Arc::new(toolchain.clone()), StencilConfig::default());
        let server = tokio::spawn(session.serve(server_read, server_write));
        let (client_read, client_write) = tokio::io::split(client);
        Self {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
            server,
        }
    }

    async fn send(&mut self, frame: Value) {
        self.writer.write_frame(&frame).await.unwrap();
    }

    async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(10), self.reader.read_frame())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
            .expect("server closed the stream")
    }

    /// Send a request and wait for its response, skipping notifications.
    async fn request(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
        loop {
            let frame = self.next_frame().await;
            if frame["id"] == id {
                return frame;
            }
        }
    }

    async fn initialize(&mut self, options: Value) {
        let response = self
            .request(1, "initialize", json!({ "initializationOptions": options }))
            .await;
        assert!(response.get("result").is_some(), "initialize failed: {response}");
        self.notify("initialized", json!({})).await;
    }

    async fn open(&mut self, uri: &Url, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({ "textDocument": { "uri": uri.as_str(), "languageId": "ergo", "version": 1, "text": text } }),
        )
        .await;
    }

    async fn change(&mut self, uri: &Url, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri.as_str(), "version": 2 },
                "contentChanges": [{ "text": text }]
            }),
        )
        .await;
    }

    /// Wait for the next diagnostics published for `uri`.
    async fn diagnostics_for(&mut self, uri: &Url) -> Vec<Diagnostic> {
        loop {
            let frame = self.next_frame().await;
            if frame["method"] == "textDocument/publishDiagnostics"
                && frame["params"]["uri"] == uri.as_str()
            {
                return serde_json::from_value(frame["params"]["diagnostics"].clone()).unwrap();
            }
        }
    }

    async fn shutdown(mut self) {
        let response = self.request(99, "shutdown", Value::Null).await;
        assert_eq!(response["result"], Value::Null);
        self.notify("exit", Value::Null).await;
        self.server.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn edits_publish_then_clear_diagnostics() {
    let package = Package::new();
    let toolchain = FakeToolchain::new();
    let mut client = Client::start(&toolchain);
    client.initialize(Value::Null).await;
    let logic = package.uri("lib/logic.ergo");

    client.open(&logic, BROKEN_LOGIC).await;
    let diagnostics = client.diagnostics_for(&logic).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].stage(), Stage::Logic);
    assert_eq!(diagnostics[0].range(), Range::point(Position::new(2, 4)));

    client.change(&logic, LOGIC).await;
    assert!(client.diagnostics_for(&logic).await.is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn document_outside_package_gets_one_diagnostic() {
    let package = Package::empty();
    package.write("notes/readme.cto", "namespace org.notes\n");
    let toolchain = FakeToolchain::new();
    let mut client = Client::start(&toolchain);
    client.initialize(Value::Null).await;
    let uri = package.uri("notes/readme.cto");

    client.open(&uri, "namespace org.notes\n").await;
    let diagnostics = client.diagnostics_for(&uri).await;

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].stage(), Stage::Template);
    assert_eq!(diagnostics[0].range(), Range::DOCUMENT_START);
    client.shutdown().await;
}

#[tokio::test]
async fn open_documents_are_revalidated_when_enabled() {
    let package = Package::new();
    let toolchain = FakeToolchain::new();
    let mut client = Client::start(&toolchain);
    client
        .initialize(json!({ "session": { "revalidate_open_documents": true } }))
        .await;
    let logic = package.uri("lib/logic.ergo");

    client.open(&logic, BROKEN_LOGIC).await;
    assert_eq!(client.diagnostics_for(&logic).await.len(), 1);

    // Opening an unrelated file revalidates the broken logic file too.
    client.open(&package.uri("sample.txt"), "Hello Fred!\n").await;
    assert_eq!(client.diagnostics_for(&logic).await.len(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn removed_workspace_folder_drops_compiled_state() {
    let package = Package::new();
    let toolchain = FakeToolchain::new();
    let mut client = Client::start(&toolchain);
    client.initialize(Value::Null).await;
    let model = package.uri("models/model.cto");
    let text = std::fs::read_to_string(package.path("models/model.cto")).unwrap();

    client.open(&model, &text).await;
    client.diagnostics_for(&model).await;
    client.change(&model, &text).await;
    client.diagnostics_for(&model).await;
    assert_eq!(toolchain.ops.count(&Op::NewRegistry), 1);

    let folder = Url::from_file_path(package.root()).unwrap();
    client
        .notify(
            "workspace/didChangeWorkspaceFolders",
            json!({ "event": { "added": [], "removed": [{ "uri": folder.as_str(), "name": "helloworld" }] } }),
        )
        .await;
    client.change(&model, &text).await;
    client.diagnostics_for(&model).await;

    assert_eq!(toolchain.ops.count(&Op::NewRegistry), 2);
    client.shutdown().await;
}
