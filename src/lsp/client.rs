//! One language server subprocess and its protocol session.
//!
//! A [`LanguageServer`] owns the transport and the table of files it has
//! opened with the server. Every position-based request goes through the
//! file-version discipline: the on-disk content hash is recomputed and, on
//! mismatch with the tracked entry, a full-content `didChange` is pushed
//! before the request. This is the only mechanism that converges the
//! server's view with disk state; there is no file watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized,
    Notification as _,
};
use lsp_types::request::{
    DocumentSymbolRequest, GotoDefinition, HoverRequest, References, Rename, Request as _,
    Shutdown,
};
use lsp_types::{
    ClientCapabilities, ClientInfo, Diagnostic, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentSymbolClientCapabilities,
    DocumentSymbolParams, DocumentSymbolResponse, DynamicRegistrationClientCapabilities,
    GotoCapability, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverClientCapabilities,
    HoverParams, InitializeParams, InitializeResult, Location, MarkupKind, OneOf,
    PartialResultParams, Position, PublishDiagnosticsParams, ReferenceContext, ReferenceParams,
    RenameClientCapabilities, RenameParams, ServerCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, TextDocumentSyncClientCapabilities, TraceValue, Url,
    VersionedTextDocumentIdentifier, WindowClientCapabilities, WorkDoneProgressParams,
    WorkspaceClientCapabilities, WorkspaceEdit, WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use serde_json::{Value, json};
use tokio::process::Child;

use crate::config::{Language, ServerCommand, Timeouts};
use crate::error::{LspError, TransportError};
use crate::symbols::cache::{CacheKey, SymbolCache, content_hash};
use crate::symbols::model::SymbolTree;

use super::transport::Transport;
use super::types::{path_to_url, url_to_path};

/// Lifecycle of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed but not spawned.
    Unstarted,
    /// Handshake in flight.
    Starting,
    /// Serving requests.
    Ready,
    /// Graceful shutdown in flight.
    Stopping,
    /// Shut down cleanly.
    Stopped,
    /// Transport closed or unrecoverable error; stays failed until the
    /// project is reactivated.
    Failed,
}

impl ServerState {
    fn name(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// Per-open-file bookkeeping.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Monotonic document version: 1 at didOpen, +1 per didChange.
    pub version: i32,
    /// Hash of the content last pushed to the server.
    pub content_hash: String,
}

/// A running language server and its session state.
pub struct LanguageServer {
    language: Language,
    ls_id: String,
    workspace_root: PathBuf,
    transport: Transport,
    child: Mutex<Option<Child>>,
    capabilities: ServerCapabilities,
    state: Mutex<ServerState>,
    files: tokio::sync::Mutex<HashMap<Url, FileEntry>>,
    diagnostics: Arc<Mutex<HashMap<Url, Vec<Diagnostic>>>>,
    timeouts: Timeouts,
    cache: Arc<SymbolCache>,
}

impl std::fmt::Debug for LanguageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServer")
            .field("ls_id", &self.ls_id)
            .field("language", &self.language)
            .field("state", &self.state())
            .finish()
    }
}

impl LanguageServer {
    /// Spawns the configured server command and runs the initialize
    /// handshake. Fails with `StartupFailed` when the process cannot be
    /// spawned or does not answer within the startup timeout.
    pub async fn start(
        language: Language,
        command: &ServerCommand,
        workspace_root: &Path,
        cache: Arc<SymbolCache>,
        timeouts: Timeouts,
    ) -> Result<Self, LspError> {
        let (transport, child) = Transport::spawn(&command.command, &command.args, workspace_root)
            .map_err(|e| {
                LspError::StartupFailed(format!("failed to spawn '{}': {e}", command.command))
            })?;
        Self::connect(
            transport,
            Some(child),
            language,
            command.ls_id().to_string(),
            workspace_root,
            cache,
            timeouts,
        )
        .await
    }

    /// Runs the handshake over an already-attached transport.
    ///
    /// `child` is `None` for in-process servers (tests connect scripted
    /// servers over duplex pipes).
    pub async fn connect(
        transport: Transport,
        child: Option<Child>,
        language: Language,
        ls_id: String,
        workspace_root: &Path,
        cache: Arc<SymbolCache>,
        timeouts: Timeouts,
    ) -> Result<Self, LspError> {
        let diagnostics: Arc<Mutex<HashMap<Url, Vec<Diagnostic>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        register_notification_handlers(&transport, &diagnostics);

        let init_params = initialize_params(workspace_root, &ls_id)?;
        let raw = transport
            .call(
                lsp_types::request::Initialize::METHOD,
                serde_json::to_value(init_params).map_err(TransportError::Json)?,
                timeouts.startup,
            )
            .await
            .map_err(|e| LspError::StartupFailed(format!("initialize failed: {e}")))?;
        let init: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| LspError::StartupFailed(format!("bad initialize result: {e}")))?;

        transport.notify(Initialized::METHOD, json!({}))?;

        Ok(Self {
            language,
            ls_id,
            workspace_root: workspace_root.to_path_buf(),
            transport,
            child: Mutex::new(child),
            capabilities: init.capabilities,
            state: Mutex::new(ServerState::Ready),
            files: tokio::sync::Mutex::new(HashMap::new()),
            diagnostics,
            timeouts,
            cache,
        })
    }

    /// Identity used for cache keys and error messages.
    pub fn ls_id(&self) -> &str {
        &self.ls_id
    }

    /// The language this server handles.
    pub fn language(&self) -> Language {
        self.language
    }

    /// Capabilities declared by the server at initialize time.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Workspace root this server was started in.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Current lifecycle state. A closed transport is surfaced as `Failed`.
    pub fn state(&self) -> ServerState {
        let mut state = self.state.lock().expect("state lock");
        if *state == ServerState::Ready && self.transport.is_closed() {
            *state = ServerState::Failed;
        }
        *state
    }

    /// Number of requests this server has been sent. Cache hits are visible
    /// as an unchanged count.
    pub fn requests_sent(&self) -> u64 {
        self.transport.requests_sent()
    }

    /// Tracked open version of a file, if open.
    pub async fn open_version(&self, path: &Path) -> Option<i32> {
        let uri = path_to_url(path).ok()?;
        self.files.lock().await.get(&uri).map(|e| e.version)
    }

    /// Latest published diagnostics for a file.
    pub fn diagnostics_for(&self, path: &Path) -> Vec<Diagnostic> {
        let Ok(uri) = path_to_url(path) else {
            return Vec::new();
        };
        self.diagnostics
            .lock()
            .expect("diagnostics lock")
            .get(&uri)
            .cloned()
            .unwrap_or_default()
    }

    fn ensure_ready(&self) -> Result<(), LspError> {
        match self.state() {
            ServerState::Ready => Ok(()),
            other => Err(LspError::ServerDown(format!(
                "{} is {}",
                self.ls_id,
                other.name()
            ))),
        }
    }

    fn mark_failed(&self) {
        *self.state.lock().expect("state lock") = ServerState::Failed;
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.ensure_ready()?;
        match self.transport.call(method, params, self.timeouts.request).await {
            Ok(value) => Ok(value),
            Err(TransportError::Closed) => {
                self.mark_failed();
                Err(TransportError::Closed.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens `path` at its current on-disk content, or syncs it if the disk
    /// content drifted from the tracked hash. Returns the URI, the content
    /// that is now the server's view, and its hash.
    pub async fn ensure_open(&self, path: &Path) -> Result<(Url, String, String), LspError> {
        self.ensure_ready()?;
        let uri = path_to_url(path)?;
        let content = tokio::fs::read_to_string(path).await?;
        let hash = content_hash(content.as_bytes());

        let mut files = self.files.lock().await;
        match files.get_mut(&uri) {
            None => {
                self.transport.notify(
                    DidOpenTextDocument::METHOD,
                    serde_json::to_value(DidOpenTextDocumentParams {
                        text_document: TextDocumentItem {
                            uri: uri.clone(),
                            language_id: self.language.language_id().to_string(),
                            version: 1,
                            text: content.clone(),
                        },
                    })
                    .map_err(TransportError::Json)?,
                )?;
                files.insert(
                    uri.clone(),
                    FileEntry {
                        version: 1,
                        content_hash: hash.clone(),
                    },
                );
            }
            Some(entry) if entry.content_hash != hash => {
                entry.version += 1;
                entry.content_hash = hash.clone();
                let version = entry.version;
                self.notify_change(&uri, version, &content)?;
            }
            Some(_) => {}
        }
        Ok((uri, content, hash))
    }

    fn notify_change(&self, uri: &Url, version: i32, content: &str) -> Result<(), LspError> {
        self.transport.notify(
            DidChangeTextDocument::METHOD,
            serde_json::to_value(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: content.to_string(),
                }],
            })
            .map_err(TransportError::Json)?,
        )?;
        Ok(())
    }

    /// Pushes new file content to the server after an on-disk write.
    ///
    /// Always bumps the version while the file is open, even when the bytes
    /// are identical, so the server's view never lags the disk. A file that
    /// was never opened needs nothing; the next request reopens it at the
    /// new hash.
    pub async fn did_change_to(&self, path: &Path, content: &str) -> Result<(), LspError> {
        self.ensure_ready()?;
        let uri = path_to_url(path)?;
        let hash = content_hash(content.as_bytes());
        let mut files = self.files.lock().await;
        if let Some(entry) = files.get_mut(&uri) {
            entry.version += 1;
            entry.content_hash = hash;
            let version = entry.version;
            self.notify_change(&uri, version, content)?;
        }
        Ok(())
    }

    /// Closes a file and drops its entry. Idempotent.
    pub async fn did_close(&self, path: &Path) -> Result<(), LspError> {
        self.ensure_ready()?;
        let uri = path_to_url(path)?;
        let mut files = self.files.lock().await;
        if files.remove(&uri).is_some() {
            self.transport.notify(
                DidCloseTextDocument::METHOD,
                serde_json::to_value(DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri: uri.clone() },
                })
                .map_err(TransportError::Json)?,
            )?;
        }
        self.diagnostics
            .lock()
            .expect("diagnostics lock")
            .remove(&uri);
        Ok(())
    }

    /// Fetches the file's symbol tree, consulting the cache first.
    ///
    /// A hit for `(path, content_hash, ls_id)` answers without touching the
    /// server; a miss issues `textDocument/documentSymbol`, converts either
    /// response variant into the uniform tree, and stores it. The returned
    /// hash identifies the content version the tree describes.
    pub async fn document_symbols(
        &self,
        path: &Path,
    ) -> Result<(Arc<SymbolTree>, String), LspError> {
        let (uri, content, hash) = self.ensure_open(path).await?;
        let canonical = url_to_path(&uri)?;
        let key = CacheKey {
            file_path: &canonical,
            content_hash: &hash,
            ls_id: &self.ls_id,
        };
        if let Some(tree) = self.cache.get(&key) {
            return Ok((Arc::new(tree), hash));
        }

        let raw = self
            .request(
                DocumentSymbolRequest::METHOD,
                serde_json::to_value(DocumentSymbolParams {
                    text_document: TextDocumentIdentifier { uri },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .map_err(TransportError::Json)?,
            )
            .await?;
        let response: Option<DocumentSymbolResponse> = serde_json::from_value(raw)
            .map_err(|e| LspError::Protocol(format!("bad documentSymbol response: {e}")))?;
        let tree = SymbolTree::from_response(
            &response.unwrap_or(DocumentSymbolResponse::Nested(Vec::new())),
            &content,
        );
        self.cache.put(&key, &tree);
        Ok((Arc::new(tree), hash))
    }

    /// `textDocument/references` at a position.
    pub async fn references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, LspError> {
        let (uri, _, _) = self.ensure_open(path).await?;
        let raw = self
            .request(
                References::METHOD,
                serde_json::to_value(ReferenceParams {
                    text_document_position: TextDocumentPositionParams {
                        text_document: TextDocumentIdentifier { uri },
                        position,
                    },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                    context: ReferenceContext {
                        include_declaration,
                    },
                })
                .map_err(TransportError::Json)?,
            )
            .await?;
        let locations: Option<Vec<Location>> = serde_json::from_value(raw)
            .map_err(|e| LspError::Protocol(format!("bad references response: {e}")))?;
        Ok(locations.unwrap_or_default())
    }

    /// `textDocument/definition`, normalized to a location list.
    pub async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<Location>, LspError> {
        let (uri, _, _) = self.ensure_open(path).await?;
        let raw = self
            .request(
                GotoDefinition::METHOD,
                serde_json::to_value(GotoDefinitionParams {
                    text_document_position_params: TextDocumentPositionParams {
                        text_document: TextDocumentIdentifier { uri },
                        position,
                    },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .map_err(TransportError::Json)?,
            )
            .await?;
        let response: Option<GotoDefinitionResponse> = serde_json::from_value(raw)
            .map_err(|e| LspError::Protocol(format!("bad definition response: {e}")))?;
        Ok(definition_locations(response))
    }

    /// `textDocument/hover` passthrough.
    pub async fn hover(&self, path: &Path, position: Position) -> Result<Option<Hover>, LspError> {
        let (uri, _, _) = self.ensure_open(path).await?;
        let raw = self
            .request(
                HoverRequest::METHOD,
                serde_json::to_value(HoverParams {
                    text_document_position_params: TextDocumentPositionParams {
                        text_document: TextDocumentIdentifier { uri },
                        position,
                    },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                })
                .map_err(TransportError::Json)?,
            )
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| LspError::Protocol(format!("bad hover response: {e}")))
    }

    /// `textDocument/rename`, returning the server's workspace edit.
    pub async fn rename(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
    ) -> Result<WorkspaceEdit, LspError> {
        if !rename_supported(&self.capabilities) {
            return Err(LspError::RenameNotSupported(self.ls_id.clone()));
        }
        let (uri, _, _) = self.ensure_open(path).await?;
        let raw = self
            .request(
                Rename::METHOD,
                serde_json::to_value(RenameParams {
                    text_document_position: TextDocumentPositionParams {
                        text_document: TextDocumentIdentifier { uri },
                        position,
                    },
                    new_name: new_name.to_string(),
                    work_done_progress_params: WorkDoneProgressParams::default(),
                })
                .map_err(TransportError::Json)?,
            )
            .await
            .map_err(|e| match e {
                LspError::Transport(TransportError::Rpc { message, .. }) => {
                    LspError::RenameInvalid(message)
                }
                other => other,
            })?;
        let edit: Option<WorkspaceEdit> = serde_json::from_value(raw)
            .map_err(|e| LspError::Protocol(format!("bad rename response: {e}")))?;
        edit.ok_or_else(|| LspError::RenameInvalid("server returned no edit".to_string()))
    }

    /// Graceful shutdown: `shutdown` request, `exit` notification, bounded
    /// wait, kill on straggle. Drops every file entry.
    pub async fn shutdown(&self) -> Result<(), LspError> {
        {
            let mut state = self.state.lock().expect("state lock");
            if matches!(*state, ServerState::Stopping | ServerState::Stopped) {
                return Ok(());
            }
            *state = ServerState::Stopping;
        }

        let _ = self
            .transport
            .call(Shutdown::METHOD, Value::Null, self.timeouts.shutdown)
            .await;
        let _ = self.transport.notify(Exit::METHOD, Value::Null);

        let child = self.child.lock().expect("child lock").take();
        if let Some(mut child) = child {
            match tokio::time::timeout(self.timeouts.shutdown, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(ls_id = %self.ls_id, "language server did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.files.lock().await.clear();
        *self.state.lock().expect("state lock") = ServerState::Stopped;
        Ok(())
    }
}

fn rename_supported(capabilities: &ServerCapabilities) -> bool {
    !matches!(
        &capabilities.rename_provider,
        None | Some(OneOf::Left(false))
    )
}

fn definition_locations(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}

fn register_notification_handlers(
    transport: &Transport,
    diagnostics: &Arc<Mutex<HashMap<Url, Vec<Diagnostic>>>>,
) {
    let sink = Arc::clone(diagnostics);
    transport.on_notification("textDocument/publishDiagnostics", move |params| {
        match serde_json::from_value::<PublishDiagnosticsParams>(params) {
            Ok(p) => {
                sink.lock()
                    .expect("diagnostics lock")
                    .insert(p.uri, p.diagnostics);
            }
            Err(e) => tracing::debug!(error = %e, "bad publishDiagnostics payload"),
        }
    });

    transport.on_notification("window/logMessage", |params| {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match params.get("type").and_then(Value::as_u64) {
            Some(1) => tracing::error!(target: "ls", "{message}"),
            Some(2) => tracing::warn!(target: "ls", "{message}"),
            Some(3) => tracing::info!(target: "ls", "{message}"),
            _ => tracing::debug!(target: "ls", "{message}"),
        }
    });

    transport.on_notification("$/progress", |params| {
        tracing::trace!(target: "ls", progress = %params, "server progress");
    });
}

fn initialize_params(workspace_root: &Path, ls_id: &str) -> Result<InitializeParams, LspError> {
    let workspace_uri = Url::from_file_path(workspace_root).map_err(|()| {
        LspError::StartupFailed(format!(
            "invalid workspace root path: {}",
            workspace_root.display()
        ))
    })?;

    Ok(InitializeParams {
        process_id: Some(std::process::id()),
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: workspace_uri,
            name: workspace_root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(ls_id)
                .to_string(),
        }]),
        initialization_options: None,
        capabilities: ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                apply_edit: Some(true),
                workspace_edit: Some(WorkspaceEditClientCapabilities {
                    document_changes: Some(true),
                    ..Default::default()
                }),
                did_change_configuration: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                ..Default::default()
            }),
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    did_save: Some(false),
                }),
                hover: Some(HoverClientCapabilities {
                    dynamic_registration: Some(false),
                    content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                }),
                definition: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(true),
                }),
                references: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                document_symbol: Some(DocumentSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    hierarchical_document_symbol_support: Some(true),
                    ..Default::default()
                }),
                rename: Some(RenameClientCapabilities {
                    dynamic_registration: Some(false),
                    prepare_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            window: Some(WindowClientCapabilities {
                work_done_progress: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        trace: Some(TraceValue::Off),
        client_info: Some(ClientInfo {
            name: "kadabra-sigils".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
        work_done_progress_params: WorkDoneProgressParams::default(),
        ..Default::default()
    })
}
