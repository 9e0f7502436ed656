//! Mutation tools: body replacement, insertion, rename.
//!
//! Each tool resolves its name-path to exactly one symbol first; an
//! ambiguous path is refused rather than silently acting on the first hit.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::Agent;
use crate::error::{Error, ToolError};
use crate::symbols::model::NamePath;
use crate::symbols::retriever::ResolvedSymbol;

use super::{Tool, parse_args, schema_of};

/// Parameters for the `replace_symbol_body` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceSymbolBodyParams {
    /// Name-path of the symbol to replace.
    #[schemars(description = "Name-path of the symbol whose body to replace")]
    pub name_path: String,
    /// File defining the symbol.
    #[schemars(description = "File that defines the symbol, relative to the project root")]
    pub path: String,
    /// Replacement text, written verbatim.
    #[schemars(description = "New body text, written verbatim including indentation")]
    pub new_body: String,
}

/// Parameters for the insertion tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InsertAtSymbolParams {
    /// Name-path of the anchor symbol.
    #[schemars(description = "Name-path of the symbol to insert relative to")]
    pub name_path: String,
    /// File defining the symbol.
    #[schemars(description = "File that defines the symbol, relative to the project root")]
    pub path: String,
    /// Text to insert, written verbatim.
    #[schemars(description = "Text to insert, written verbatim (no reflow)")]
    pub text: String,
}

/// Parameters for the `rename_symbol` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameSymbolParams {
    /// Name-path of the symbol to rename.
    #[schemars(description = "Name-path of the symbol to rename")]
    pub name_path: String,
    /// File defining the symbol.
    #[schemars(description = "File that defines the symbol, relative to the project root")]
    pub path: String,
    /// The new name.
    #[schemars(description = "New name for the symbol")]
    pub new_name: String,
}

async fn resolve(
    agent: &Agent,
    raw_name_path: &str,
    path: &str,
) -> Result<(Arc<crate::agent::Project>, ResolvedSymbol), Error> {
    let name_path: NamePath = raw_name_path
        .parse()
        .map_err(|e: String| ToolError::InvalidInput(e))?;
    let project = agent.project().await?;
    let symbol = project
        .retriever()
        .resolve_unique(&name_path, &PathBuf::from(path))
        .await?;
    Ok((project, symbol))
}

fn ok_json(value: Value) -> Result<String, Error> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| ToolError::InvalidInput(format!("failed to encode result: {e}")).into())
}

/// Replaces a symbol's body.
pub struct ReplaceSymbolBodyTool {
    agent: Arc<Agent>,
}

impl ReplaceSymbolBodyTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for ReplaceSymbolBodyTool {
    fn name(&self) -> &'static str {
        "replace_symbol_body"
    }

    fn description(&self) -> &'static str {
        "Replace a symbol's entire body with new text. The text is written verbatim; bring your own indentation."
    }

    fn schema(&self) -> Value {
        schema_of::<ReplaceSymbolBodyParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: ReplaceSymbolBodyParams = parse_args(args)?;
            let (project, symbol) = resolve(&self.agent, &params.name_path, &params.path).await?;
            project.edits().replace_body(&symbol, &params.new_body).await?;
            ok_json(json!({
                "replaced": symbol.name_path().to_string(),
                "file": params.path,
            }))
        })
    }
}

/// Inserts text before a symbol.
pub struct InsertBeforeSymbolTool {
    agent: Arc<Agent>,
}

impl InsertBeforeSymbolTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for InsertBeforeSymbolTool {
    fn name(&self) -> &'static str {
        "insert_before_symbol"
    }

    fn description(&self) -> &'static str {
        "Insert text immediately before a symbol's definition. Useful for new imports, decorators, or sibling definitions."
    }

    fn schema(&self) -> Value {
        schema_of::<InsertAtSymbolParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: InsertAtSymbolParams = parse_args(args)?;
            let (project, symbol) = resolve(&self.agent, &params.name_path, &params.path).await?;
            project.edits().insert_before(&symbol, &params.text).await?;
            ok_json(json!({
                "insertedBefore": symbol.name_path().to_string(),
                "file": params.path,
            }))
        })
    }
}

/// Inserts text after a symbol.
pub struct InsertAfterSymbolTool {
    agent: Arc<Agent>,
}

impl InsertAfterSymbolTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for InsertAfterSymbolTool {
    fn name(&self) -> &'static str {
        "insert_after_symbol"
    }

    fn description(&self) -> &'static str {
        "Insert text immediately after a symbol's definition. Useful for adding sibling definitions."
    }

    fn schema(&self) -> Value {
        schema_of::<InsertAtSymbolParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: InsertAtSymbolParams = parse_args(args)?;
            let (project, symbol) = resolve(&self.agent, &params.name_path, &params.path).await?;
            project.edits().insert_after(&symbol, &params.text).await?;
            ok_json(json!({
                "insertedAfter": symbol.name_path().to_string(),
                "file": params.path,
            }))
        })
    }
}

/// Renames a symbol across the workspace.
pub struct RenameSymbolTool {
    agent: Arc<Agent>,
}

impl RenameSymbolTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for RenameSymbolTool {
    fn name(&self) -> &'static str {
        "rename_symbol"
    }

    fn description(&self) -> &'static str {
        "Rename a symbol everywhere it is used, via the language server's rename refactoring."
    }

    fn schema(&self) -> Value {
        schema_of::<RenameSymbolParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: RenameSymbolParams = parse_args(args)?;
            let (project, symbol) = resolve(&self.agent, &params.name_path, &params.path).await?;
            let applied = project.edits().rename(&symbol, &params.new_name).await?;

            let files: Vec<String> = applied
                .files
                .iter()
                .map(|f| {
                    f.strip_prefix(project.root())
                        .unwrap_or(f)
                        .display()
                        .to_string()
                })
                .collect();
            ok_json(json!({
                "renamed": params.name_path,
                "newName": params.new_name,
                "files": files,
                "editCount": applied.edit_count,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_decode() {
        let params: ReplaceSymbolBodyParams = serde_json::from_value(json!({
            "namePath": "Calc/add",
            "path": "a.py",
            "newBody": "def add(self, a, b):\n    return a + b\n",
        }))
        .unwrap();
        assert_eq!(params.name_path, "Calc/add");

        // Missing required field fails decoding.
        let result: Result<RenameSymbolParams, _> =
            serde_json::from_value(json!({"namePath": "x", "path": "a.py"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_rename_schema_requires_new_name() {
        let agent = Arc::new(Agent::new(crate::config::ServerRegistry::default()));
        let schema = RenameSymbolTool::new(&agent).schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("newName")));
    }
}
