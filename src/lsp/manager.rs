//! Per-project language server fleet.
//!
//! Servers start lazily: the first request for a language triggers the
//! spawn, and concurrent first requests coalesce onto a single in-flight
//! start via a per-language cell. Different languages start in parallel. A
//! failed start is remembered and fails fast until the project is
//! reactivated (which builds a fresh manager).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::config::{Language, ServerRegistry, Timeouts};
use crate::error::{LspError, ToolError};
use crate::symbols::cache::SymbolCache;

use super::client::LanguageServer;

type ServerCell = Arc<OnceCell<Result<Arc<LanguageServer>, String>>>;

/// Owns every language server of one project root.
pub struct LanguageServerManager {
    root: PathBuf,
    registry: ServerRegistry,
    cache: Arc<SymbolCache>,
    servers: Mutex<HashMap<Language, ServerCell>>,
}

impl std::fmt::Debug for LanguageServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServerManager")
            .field("root", &self.root)
            .finish()
    }
}

impl LanguageServerManager {
    /// Manager for a project root with the given registry.
    pub fn new(root: PathBuf, registry: ServerRegistry, cache: Arc<SymbolCache>) -> Self {
        Self {
            root,
            registry,
            cache,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Timeouts shared by the fleet.
    pub fn timeouts(&self) -> Timeouts {
        self.registry.timeouts
    }

    /// True when a server is configured for the file's language.
    pub fn supports(&self, path: &Path) -> bool {
        self.registry.supports(path)
    }

    /// Returns the server responsible for `path`, starting it on first use.
    pub async fn server_for(&self, path: &Path) -> Result<Arc<LanguageServer>, ToolError> {
        let language = Language::from_path(path)
            .ok_or_else(|| ToolError::UnsupportedLanguage(path.display().to_string()))?;
        self.server_for_language(language).await
    }

    /// Returns the server for a language, starting it on first use.
    pub async fn server_for_language(
        &self,
        language: Language,
    ) -> Result<Arc<LanguageServer>, ToolError> {
        let command = self
            .registry
            .command_for(language)
            .ok_or_else(|| ToolError::UnsupportedLanguage(language.name().to_string()))?
            .clone();

        let cell: ServerCell = Arc::clone(
            self.servers
                .lock()
                .expect("server table lock")
                .entry(language)
                .or_default(),
        );

        let outcome = cell
            .get_or_init(|| async {
                tracing::info!(
                    language = language.name(),
                    command = %command.command,
                    "starting language server"
                );
                match LanguageServer::start(
                    language,
                    &command,
                    &self.root,
                    Arc::clone(&self.cache),
                    self.registry.timeouts,
                )
                .await
                {
                    Ok(server) => Ok(Arc::new(server)),
                    Err(e) => {
                        tracing::error!(
                            language = language.name(),
                            error = %e,
                            "language server failed to start"
                        );
                        Err(e.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(server) => Ok(Arc::clone(server)),
            Err(message) => Err(ToolError::Lsp(LspError::StartupFailed(message.clone()))),
        }
    }

    /// Shuts down every running server, joining with a bounded deadline and
    /// force-killing stragglers. The manager is empty afterwards.
    pub async fn shutdown_all(&self) {
        let cells: Vec<ServerCell> = {
            let mut servers = self.servers.lock().expect("server table lock");
            servers.drain().map(|(_, cell)| cell).collect()
        };

        let running: Vec<Arc<LanguageServer>> = cells
            .iter()
            .filter_map(|cell| cell.get())
            .filter_map(|outcome| outcome.as_ref().ok().cloned())
            .collect();

        let deadline = self.registry.timeouts.shutdown.saturating_mul(3);
        let shutdowns = running.into_iter().map(|server| async move {
            if tokio::time::timeout(deadline, server.shutdown()).await.is_err() {
                tracing::warn!(ls_id = server.ls_id(), "shutdown deadline exceeded");
            }
        });
        futures::future::join_all(shutdowns).await;
    }
}
