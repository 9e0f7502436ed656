//! Tool registry and dispatch.
//!
//! Every tool is a value behind the [`Tool`] capability: a name, a
//! description, a JSON schema for its input, and an invocation function.
//! The dispatcher only ever sees that capability; argument decoding happens
//! inside each tool. Invocations run under a per-tool deadline, and results
//! come back as an ok/error envelope with a stable error kind.

pub mod edit_tools;
pub mod project_tools;
pub mod symbol_tools;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::{Error, ToolError};

/// Default per-tool deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(240);

/// Deadline for tools that may trigger whole-workspace symbol indexing.
pub const INDEXING_TOOL_TIMEOUT: Duration = Duration::from_secs(480);

/// A named tool with a schema and an invocation function.
pub trait Tool: Send + Sync {
    /// Registry name, also the MCP tool name.
    fn name(&self) -> &'static str;

    /// Human description advertised to the client.
    fn description(&self) -> &'static str;

    /// JSON schema of the input arguments.
    fn schema(&self) -> Value;

    /// Deadline for one invocation.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Runs the tool. The returned text is the full payload handed to the
    /// client; structured results are JSON-encoded inside it.
    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>>;
}

/// Outcome envelope returned by the dispatcher.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    /// Successful invocation.
    Ok {
        /// The tool's text payload.
        text: String,
    },
    /// Failed invocation.
    Error {
        /// Stable error kind from the taxonomy.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

impl ToolOutcome {
    fn from_error(error: &Error) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Registry of tools, dispatched by name with per-tool deadlines.
pub struct ToolDispatcher {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Dispatcher with the full tool surface bound to `agent`.
    pub fn with_standard_tools(agent: &Arc<Agent>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(symbol_tools::FindSymbolTool::new(agent)));
        dispatcher.register(Arc::new(symbol_tools::FindReferencingSymbolsTool::new(agent)));
        dispatcher.register(Arc::new(symbol_tools::GetSymbolsOverviewTool::new(agent)));
        dispatcher.register(Arc::new(symbol_tools::HoverTool::new(agent)));
        dispatcher.register(Arc::new(edit_tools::ReplaceSymbolBodyTool::new(agent)));
        dispatcher.register(Arc::new(edit_tools::InsertBeforeSymbolTool::new(agent)));
        dispatcher.register(Arc::new(edit_tools::InsertAfterSymbolTool::new(agent)));
        dispatcher.register(Arc::new(edit_tools::RenameSymbolTool::new(agent)));
        dispatcher.register(Arc::new(project_tools::ActivateProjectTool::new(agent)));
        dispatcher.register(Arc::new(project_tools::RestartLanguageServersTool::new(agent)));
        dispatcher
    }

    /// Adds a tool; a later registration under the same name replaces the
    /// earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Registered tools in name order.
    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Runs a tool under its deadline. A timeout abandons the tool's work;
    /// any transport wait inside it is discarded by the transport layer.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            let error: Error = ToolError::UnknownTool(name.to_string()).into();
            return ToolOutcome::from_error(&error);
        };

        let deadline = tool.timeout();
        match tokio::time::timeout(deadline, tool.invoke(args)).await {
            Err(_) => ToolOutcome::from_error(&Error::ToolTimeout(deadline)),
            Ok(Err(e)) => {
                tracing::debug!(tool = name, kind = e.kind(), error = %e, "tool failed");
                ToolOutcome::from_error(&e)
            }
            Ok(Ok(text)) => ToolOutcome::Ok { text },
        }
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes tool arguments, mapping schema violations to `InvalidInput`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, Error> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidInput(e.to_string()).into())
}

/// JSON schema for a parameter struct.
pub(crate) fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}
