//! Error types for the kadabra-sigils MCP server.
//!
//! This module defines all error types used throughout the application,
//! organized by subsystem: Transport, LSP, Tools.
//!
//! Every error maps to a stable `kind` string via [`Error::kind`]; the tool
//! dispatcher includes that kind in error envelopes returned to the client.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the JSON-RPC transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The child process exited or the stream closed; all outstanding and
    /// future calls fail with this.
    #[error("transport closed")]
    Closed,

    /// The local wait for a response exceeded its deadline. The request id
    /// stays reserved and a late response is discarded.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Structured error response from the peer, propagated verbatim.
    #[error("server error: {message} (code: {code})")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// A frame violated the Content-Length framing.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// IO error on the child's stdio.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize a message body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to language server lifecycle and requests.
#[derive(Debug, Error)]
pub enum LspError {
    /// The language server did not come up within the startup timeout.
    #[error("language server failed to start: {0}")]
    StartupFailed(String),

    /// The server is not in the `Ready` state; the entry stays failed until
    /// explicit reactivation.
    #[error("language server is down ({0})")]
    ServerDown(String),

    /// The server does not advertise rename support.
    #[error("rename is not supported by {0}")]
    RenameNotSupported(String),

    /// The server rejected the rename (bad position, invalid new name, ...).
    #[error("rename rejected: {0}")]
    RenameInvalid(String),

    /// The server returned something the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure underneath the request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// IO error reading workspace files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to tool execution and symbol resolution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No language server is configured for the file's language.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Name-path resolution produced no symbol.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// Name-path resolution produced several equally specific symbols where
    /// exactly one is required.
    #[error("ambiguous symbol: {name_path} matches {count} symbols")]
    AmbiguousSymbol {
        /// The name-path that was resolved.
        name_path: String,
        /// Number of symbols it matched.
        count: usize,
    },

    /// The file changed on disk between symbol resolution and the write; the
    /// edit was aborted and must be retried with a fresh resolution.
    #[error("edit conflict: {} changed on disk since symbol resolution", path.display())]
    EditConflict {
        /// The file whose content hash no longer matches.
        path: PathBuf,
    },

    /// A multi-file edit halted mid-apply. Completed files are on disk with
    /// new content; pending files are untouched.
    #[error("partial edit: {completed:?} written, {pending:?} pending: {message}")]
    PartialEdit {
        /// Files already rewritten.
        completed: Vec<PathBuf>,
        /// Files not yet touched.
        pending: Vec<PathBuf>,
        /// The failure that halted the apply.
        message: String,
    },

    /// Tool arguments violated the declared schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No project has been activated yet.
    #[error("no active project")]
    NoActiveProject,

    /// The named tool is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// LSP failure during tool execution.
    #[error(transparent)]
    Lsp(#[from] LspError),

    /// IO failure during tool execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A unified error type for the entire application.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-related error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// LSP-related error.
    #[error(transparent)]
    Lsp(#[from] LspError),

    /// Tool-related error.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Tool execution exceeded its dispatcher deadline.
    #[error("tool timed out after {0:?}")]
    ToolTimeout(Duration),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable kind string for error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(TransportError::Timeout(_)) => "timeout",
            Error::Transport(TransportError::Rpc { .. }) => "lsp_error",
            Error::Transport(_) => "transport_closed",
            Error::Lsp(e) => lsp_kind(e),
            Error::Tool(e) => tool_kind(e),
            Error::ToolTimeout(_) => "timeout",
            Error::Config(_) => "invalid_input",
            Error::Io(_) => "io_error",
        }
    }
}

fn lsp_kind(e: &LspError) -> &'static str {
    match e {
        LspError::StartupFailed(_) => "startup_failed",
        LspError::ServerDown(_) => "server_down",
        LspError::RenameNotSupported(_) => "rename_not_supported",
        LspError::RenameInvalid(_) => "rename_invalid",
        LspError::Protocol(_) => "lsp_error",
        LspError::Transport(TransportError::Timeout(_)) => "timeout",
        LspError::Transport(TransportError::Rpc { .. }) => "lsp_error",
        LspError::Transport(_) => "transport_closed",
        LspError::Io(_) => "io_error",
    }
}

fn tool_kind(e: &ToolError) -> &'static str {
    match e {
        ToolError::UnsupportedLanguage(_) => "unsupported_language",
        ToolError::SymbolNotFound(_) => "symbol_not_found",
        ToolError::AmbiguousSymbol { .. } => "ambiguous_symbol",
        ToolError::EditConflict { .. } => "edit_conflict",
        ToolError::PartialEdit { .. } => "partial_edit",
        ToolError::InvalidInput(_) => "invalid_input",
        ToolError::NoActiveProject => "no_active_project",
        ToolError::UnknownTool(_) => "unknown_tool",
        ToolError::Lsp(e) => lsp_kind(e),
        ToolError::Io(_) => "io_error",
    }
}

/// A specialized Result type for kadabra-sigils operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server error: method not found (code: -32601)"
        );
    }

    #[test]
    fn test_error_conversion() {
        let lsp_err = LspError::ServerDown("failed".to_string());
        let err: Error = lsp_err.into();
        assert!(matches!(err, Error::Lsp(LspError::ServerDown(_))));
    }

    #[test]
    fn test_kind_strings() {
        let err: Error = ToolError::EditConflict {
            path: PathBuf::from("/w/a.py"),
        }
        .into();
        assert_eq!(err.kind(), "edit_conflict");

        let err: Error = LspError::Transport(TransportError::Closed).into();
        assert_eq!(err.kind(), "transport_closed");

        let err: Error = ToolError::Lsp(LspError::StartupFailed("spawn".into())).into();
        assert_eq!(err.kind(), "startup_failed");
    }

    #[test]
    fn test_tool_error_from_lsp_error() {
        let lsp_err = LspError::RenameNotSupported("gopls".to_string());
        let tool_err: ToolError = lsp_err.into();
        assert!(matches!(tool_err, ToolError::Lsp(_)));
    }
}
