//! MCP server implementation for kadabra-sigils.
//!
//! This module contains the `KadabraSigils` struct that implements the MCP
//! server. Each MCP tool method decodes its typed parameters (which also
//! produce the advertised JSON schema) and forwards through the tool
//! dispatcher, so timeouts and error kinds are enforced in one place.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::wrapper::Parameters,
    model::{
        CallToolResult, Content, ErrorCode, Implementation, ProtocolVersion, ServerCapabilities,
        ServerInfo,
    },
    tool, tool_handler, tool_router,
};
use serde::Serialize;

use crate::agent::Agent;
use crate::tools::edit_tools::{
    InsertAtSymbolParams, RenameSymbolParams, ReplaceSymbolBodyParams,
};
use crate::tools::project_tools::{ActivateProjectParams, RestartLanguageServersParams};
use crate::tools::symbol_tools::{
    FindReferencingSymbolsParams, FindSymbolParams, GetSymbolsOverviewParams, HoverToolParams,
};
use crate::tools::{ToolDispatcher, ToolOutcome};

/// MCP server exposing the symbol engine to LLM applications.
#[derive(Clone)]
pub struct KadabraSigils {
    dispatcher: Arc<ToolDispatcher>,
    #[allow(dead_code)]
    tool_router: ToolRouter<KadabraSigils>,
}

impl KadabraSigils {
    /// Creates the server with the standard tool surface bound to `agent`.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            dispatcher: Arc::new(ToolDispatcher::with_standard_tools(agent)),
            tool_router: Self::tool_router(),
        }
    }

    /// Forwards one tool call through the dispatcher and converts the
    /// outcome envelope into an MCP result.
    async fn relay(
        &self,
        name: &str,
        params: impl Serialize,
    ) -> Result<CallToolResult, McpError> {
        let args = serde_json::to_value(params).map_err(|e| {
            McpError::new(
                ErrorCode::INTERNAL_ERROR,
                format!("failed to encode arguments: {e}"),
                None,
            )
        })?;

        match self.dispatcher.dispatch(name, args).await {
            ToolOutcome::Ok { text } => Ok(CallToolResult::success(vec![Content::text(text)])),
            ToolOutcome::Error { kind, message } => {
                let code = match kind.as_str() {
                    "invalid_input" | "unknown_tool" => ErrorCode::INVALID_PARAMS,
                    _ => ErrorCode::INTERNAL_ERROR,
                };
                Err(McpError::new(code, format!("{kind}: {message}"), None))
            }
        }
    }
}

/// Tool implementations for `KadabraSigils`.
#[tool_router]
impl KadabraSigils {
    /// Find symbols by name-path across a file, directory or project.
    #[tool(
        description = "Find symbols by name-path (e.g. 'Calc/add'). Searches a file, a directory, or the whole project; supports substring and kind filters."
    )]
    async fn find_symbol(
        &self,
        Parameters(params): Parameters<FindSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("find_symbol", params).await
    }

    /// Find symbols that reference a symbol.
    #[tool(
        description = "Find all symbols referencing a given symbol. Each result names the enclosing symbol and the reference location."
    )]
    async fn find_referencing_symbols(
        &self,
        Parameters(params): Parameters<FindReferencingSymbolsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("find_referencing_symbols", params).await
    }

    /// List a file's top-level structure.
    #[tool(
        description = "List a file's symbols, top level and one level deep. A fast structural overview before drilling in."
    )]
    async fn get_symbols_overview(
        &self,
        Parameters(params): Parameters<GetSymbolsOverviewParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("get_symbols_overview", params).await
    }

    /// Get type information at a position.
    #[tool(
        description = "Get type signature and docs for the symbol at a position (1-indexed line and column)."
    )]
    async fn hover(
        &self,
        Parameters(params): Parameters<HoverToolParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("hover", params).await
    }

    /// Replace a symbol's body.
    #[tool(
        description = "Replace a symbol's entire body with new text, written verbatim. Fails if the file changed since the symbol was resolved."
    )]
    async fn replace_symbol_body(
        &self,
        Parameters(params): Parameters<ReplaceSymbolBodyParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("replace_symbol_body", params).await
    }

    /// Insert text before a symbol.
    #[tool(
        description = "Insert text immediately before a symbol's definition (imports, decorators, sibling definitions)."
    )]
    async fn insert_before_symbol(
        &self,
        Parameters(params): Parameters<InsertAtSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("insert_before_symbol", params).await
    }

    /// Insert text after a symbol.
    #[tool(
        description = "Insert text immediately after a symbol's definition."
    )]
    async fn insert_after_symbol(
        &self,
        Parameters(params): Parameters<InsertAtSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("insert_after_symbol", params).await
    }

    /// Rename a symbol across the workspace.
    #[tool(
        description = "Rename a symbol everywhere it is used, applying the language server's rename refactoring across files."
    )]
    async fn rename_symbol(
        &self,
        Parameters(params): Parameters<RenameSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("rename_symbol", params).await
    }

    /// Activate a project root.
    #[tool(
        description = "Activate a project root for all subsequent tools. Switching roots shuts the previous project down first."
    )]
    async fn activate_project(
        &self,
        Parameters(params): Parameters<ActivateProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("activate_project", params).await
    }

    /// Restart the language server fleet.
    #[tool(
        description = "Shut down and restart every language server of the active project. Use after a server failure."
    )]
    async fn restart_language_servers(
        &self,
        Parameters(params): Parameters<RestartLanguageServersParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relay("restart_language_servers", params).await
    }
}

#[tool_handler]
impl ServerHandler for KadabraSigils {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "kadabra-sigils".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Symbol-level code intelligence and editing via language servers. \
                 Activate a project, then navigate by name-paths ('Calc/add'), inspect \
                 file overviews, and apply symbol-scoped edits: replace bodies, insert \
                 before/after symbols, rename across files. Works with any LSP-compatible \
                 server (rust-analyzer, pylsp, typescript-language-server, ...)."
                    .into(),
            ),
        }
    }
}
