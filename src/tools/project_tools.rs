//! Project lifecycle tools: activation and fleet restart.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::Agent;
use crate::error::{Error, ToolError};

use super::{Tool, parse_args, schema_of};

/// Parameters for the `activate_project` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivateProjectParams {
    /// Project root directory.
    #[schemars(description = "Absolute path of the project root to activate")]
    pub path: String,
}

/// Parameters for the `restart_language_servers` tool (none).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestartLanguageServersParams {}

/// Activates a project root.
pub struct ActivateProjectTool {
    agent: Arc<Agent>,
}

impl ActivateProjectTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for ActivateProjectTool {
    fn name(&self) -> &'static str {
        "activate_project"
    }

    fn description(&self) -> &'static str {
        "Activate a project root. Re-activating the current root is a no-op; a different root shuts the previous one down first."
    }

    fn schema(&self) -> Value {
        schema_of::<ActivateProjectParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: ActivateProjectParams = parse_args(args)?;
            let project = self
                .agent
                .activate_project(&PathBuf::from(&params.path))
                .await?;
            serde_json::to_string_pretty(&json!({
                "activated": project.root().display().to_string(),
            }))
            .map_err(|e| ToolError::InvalidInput(format!("failed to encode result: {e}")).into())
        })
    }
}

/// Rebuilds the language server fleet for the current project.
pub struct RestartLanguageServersTool {
    agent: Arc<Agent>,
}

impl RestartLanguageServersTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for RestartLanguageServersTool {
    fn name(&self) -> &'static str {
        "restart_language_servers"
    }

    fn description(&self) -> &'static str {
        "Shut down and restart every language server of the active project. The recovery path after a server failure."
    }

    fn schema(&self) -> Value {
        schema_of::<RestartLanguageServersParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let _params: RestartLanguageServersParams = parse_args(args)?;
            let project = self.agent.reactivate().await?;
            serde_json::to_string_pretty(&json!({
                "restarted": project.root().display().to_string(),
            }))
            .map_err(|e| ToolError::InvalidInput(format!("failed to encode result: {e}")).into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerRegistry;
    use crate::tools::{ToolDispatcher, ToolOutcome};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_activate_project_through_dispatcher() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(Agent::new(ServerRegistry::default()));
        let dispatcher = ToolDispatcher::with_standard_tools(&agent);

        let outcome = dispatcher
            .dispatch(
                "activate_project",
                json!({"path": dir.path().to_string_lossy()}),
            )
            .await;
        assert!(matches!(outcome, ToolOutcome::Ok { .. }));
        assert!(agent.project().await.is_ok());
    }

    #[tokio::test]
    async fn test_restart_without_project_fails_with_kind() {
        let agent = Arc::new(Agent::new(ServerRegistry::default()));
        let dispatcher = ToolDispatcher::with_standard_tools(&agent);

        let outcome = dispatcher
            .dispatch("restart_language_servers", json!({}))
            .await;
        match outcome {
            ToolOutcome::Error { kind, .. } => assert_eq!(kind, "no_active_project"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_input_kind() {
        let agent = Arc::new(Agent::new(ServerRegistry::default()));
        let dispatcher = ToolDispatcher::with_standard_tools(&agent);

        let outcome = dispatcher
            .dispatch("find_symbol", json!({"wrongField": true}))
            .await;
        match outcome {
            ToolOutcome::Error { kind, .. } => assert_eq!(kind, "invalid_input"),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
