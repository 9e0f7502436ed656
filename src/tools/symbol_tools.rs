//! Query tools: symbol search, references, file overviews, hover.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::error::{Error, ToolError};
use crate::lsp::types::{
    display_position, symbol_kind_from_name, symbol_kind_name, to_lsp_position,
};
use crate::symbols::model::{FindOptions, NamePath};
use crate::symbols::retriever::ResolvedSymbol;

use super::{INDEXING_TOOL_TIMEOUT, Tool, parse_args, schema_of};

fn default_max_results() -> u32 {
    50
}

/// Parameters for the `find_symbol` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindSymbolParams {
    /// The name-path to search for.
    #[schemars(description = "Name-path of the symbol, e.g. 'Calc/add' or '/Calc' (leading slash anchors at the file's top level)")]
    pub name_path: String,
    /// Optional file or directory to search in.
    #[schemars(description = "File or directory to search, relative to the project root (default: whole project)")]
    pub scope: Option<String>,
    /// Whether the final segment matches as a substring.
    #[serde(default)]
    #[schemars(description = "Match the last name-path segment as a substring (default: false)")]
    pub substring: bool,
    /// Restrict results to these symbol kinds.
    #[schemars(description = "Symbol kinds to include, e.g. [\"class\", \"method\"] (default: all)")]
    pub kinds: Option<Vec<String>>,
    /// Maximum number of results.
    #[serde(default = "default_max_results")]
    #[schemars(description = "Maximum number of results to return (default: 50)")]
    pub max_results: u32,
}

/// Parameters for the `find_referencing_symbols` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindReferencingSymbolsParams {
    /// Name-path of the referenced symbol.
    #[schemars(description = "Name-path of the symbol whose references to find")]
    pub name_path: String,
    /// File defining the symbol.
    #[schemars(description = "File that defines the symbol, relative to the project root")]
    pub path: String,
}

/// Parameters for the `get_symbols_overview` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetSymbolsOverviewParams {
    /// File to summarize.
    #[schemars(description = "File to summarize, relative to the project root")]
    pub path: String,
}

/// Parameters for the `hover` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HoverToolParams {
    /// File to query.
    #[schemars(description = "File to query, relative to the project root")]
    pub path: String,
    /// Line number (1-indexed).
    #[schemars(description = "Line number (1-indexed)")]
    pub line: u32,
    /// Column number (1-indexed).
    #[schemars(description = "Column number (1-indexed)")]
    pub column: u32,
}

/// One `find_symbol` result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SymbolMatch {
    name_path: String,
    kind: &'static str,
    file_path: String,
    range: lsp_types::Range,
}

impl SymbolMatch {
    fn new(symbol: &ResolvedSymbol, root: &std::path::Path) -> Self {
        let node = symbol.node();
        Self {
            name_path: symbol.name_path().to_string(),
            kind: symbol_kind_name(node.kind),
            file_path: relative_to(&symbol.file_path, root),
            range: node.range,
        }
    }
}

/// One `find_referencing_symbols` result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferencingSymbol {
    name_path: String,
    kind: &'static str,
    file_path: String,
    /// 1-indexed line of the reference itself.
    line: u32,
    /// 1-indexed column of the reference itself.
    column: u32,
}

fn relative_to(path: &std::path::Path, root: &std::path::Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn parse_name_path(raw: &str) -> Result<NamePath, Error> {
    raw.parse()
        .map_err(|e: String| ToolError::InvalidInput(e).into())
}

fn parse_kinds(raw: &Option<Vec<String>>) -> Result<Vec<lsp_types::SymbolKind>, Error> {
    raw.as_deref()
        .unwrap_or_default()
        .iter()
        .map(|name| {
            symbol_kind_from_name(name).ok_or_else(|| {
                ToolError::InvalidInput(format!("unknown symbol kind '{name}'")).into()
            })
        })
        .collect()
}

fn to_json(value: &impl Serialize) -> Result<String, Error> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ToolError::InvalidInput(format!("failed to encode result: {e}")).into())
}

/// Finds symbols by name-path across a scope.
pub struct FindSymbolTool {
    agent: Arc<Agent>,
}

impl FindSymbolTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for FindSymbolTool {
    fn name(&self) -> &'static str {
        "find_symbol"
    }

    fn description(&self) -> &'static str {
        "Find symbols by name-path (e.g. 'Calc/add'). Searches a file, a directory, or the whole project."
    }

    fn schema(&self) -> Value {
        schema_of::<FindSymbolParams>()
    }

    fn timeout(&self) -> Duration {
        // May index every file in scope on a cold cache.
        INDEXING_TOOL_TIMEOUT
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: FindSymbolParams = parse_args(args)?;
            let name_path = parse_name_path(&params.name_path)?;
            let kinds = parse_kinds(&params.kinds)?;

            let project = self.agent.project().await?;
            let scope = params
                .scope
                .map(PathBuf::from)
                .unwrap_or_else(|| project.root().to_path_buf());
            let opts = FindOptions {
                substring_match: params.substring,
                kinds,
                max_results: params.max_results as usize,
                max_depth: None,
            };

            let hits = project
                .retriever()
                .find_by_name(&name_path, &scope, &opts)
                .await?;
            let matches: Vec<SymbolMatch> = hits
                .iter()
                .map(|hit| SymbolMatch::new(hit, project.root()))
                .collect();
            to_json(&matches)
        })
    }
}

/// Finds the symbols that reference a given symbol.
pub struct FindReferencingSymbolsTool {
    agent: Arc<Agent>,
}

impl FindReferencingSymbolsTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for FindReferencingSymbolsTool {
    fn name(&self) -> &'static str {
        "find_referencing_symbols"
    }

    fn description(&self) -> &'static str {
        "Find symbols that reference the given symbol: call sites, imports, usages, each with its enclosing symbol."
    }

    fn schema(&self) -> Value {
        schema_of::<FindReferencingSymbolsParams>()
    }

    fn timeout(&self) -> Duration {
        INDEXING_TOOL_TIMEOUT
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: FindReferencingSymbolsParams = parse_args(args)?;
            let name_path = parse_name_path(&params.name_path)?;

            let project = self.agent.project().await?;
            let symbol = project
                .retriever()
                .resolve_unique(&name_path, &PathBuf::from(&params.path))
                .await?;
            let references = project.retriever().find_referencing(&symbol).await?;

            let entries: Vec<ReferencingSymbol> = references
                .iter()
                .map(|(enclosing, location)| {
                    let (line, column) = display_position(location.range.start);
                    ReferencingSymbol {
                        name_path: enclosing.name_path().to_string(),
                        kind: symbol_kind_name(enclosing.node().kind),
                        file_path: relative_to(&enclosing.file_path, project.root()),
                        line,
                        column,
                    }
                })
                .collect();
            to_json(&entries)
        })
    }
}

/// Lists a file's top-level structure.
pub struct GetSymbolsOverviewTool {
    agent: Arc<Agent>,
}

impl GetSymbolsOverviewTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for GetSymbolsOverviewTool {
    fn name(&self) -> &'static str {
        "get_symbols_overview"
    }

    fn description(&self) -> &'static str {
        "List a file's symbols, top level and one level deep. A fast structural overview."
    }

    fn schema(&self) -> Value {
        schema_of::<GetSymbolsOverviewParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: GetSymbolsOverviewParams = parse_args(args)?;
            let project = self.agent.project().await?;
            let entries = project
                .retriever()
                .overview(&PathBuf::from(&params.path))
                .await?;
            to_json(&entries)
        })
    }
}

/// Type signature and documentation at a position.
pub struct HoverTool {
    agent: Arc<Agent>,
}

impl HoverTool {
    /// Binds the tool to an agent.
    pub fn new(agent: &Arc<Agent>) -> Self {
        Self {
            agent: Arc::clone(agent),
        }
    }
}

impl Tool for HoverTool {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn description(&self) -> &'static str {
        "Get type signature and docs for the symbol at a position. Quick way to understand what something is."
    }

    fn schema(&self) -> Value {
        schema_of::<HoverToolParams>()
    }

    fn invoke<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let params: HoverToolParams = parse_args(args)?;
            let position = to_lsp_position(params.line, params.column)
                .map_err(|e| ToolError::InvalidInput(e.to_string()))?;

            let project = self.agent.project().await?;
            let path = if PathBuf::from(&params.path).is_absolute() {
                PathBuf::from(&params.path)
            } else {
                project.root().join(&params.path)
            };
            let server = project
                .manager()
                .server_for(&path)
                .await
                .map_err(Error::Tool)?;
            let hover = server.hover(&path, position).await.map_err(Error::Lsp)?;

            Ok(match hover {
                Some(hover) => {
                    let text = hover_text(hover.contents);
                    if text.is_empty() {
                        "No hover information available.".to_string()
                    } else {
                        text
                    }
                }
                None => "No hover information available.".to_string(),
            })
        })
    }
}

/// Extracts markdown text from any of the hover content shapes.
fn hover_text(contents: lsp_types::HoverContents) -> String {
    use lsp_types::{HoverContents, MarkedString};
    let marked = |ms: MarkedString| match ms {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(ls) => {
            format!("```{}\n{}\n```", ls.language, ls.value)
        }
    };
    match contents {
        HoverContents::Scalar(ms) => marked(ms),
        HoverContents::Array(list) => list
            .into_iter()
            .map(marked)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_symbol_params_defaults() {
        let params: FindSymbolParams =
            serde_json::from_value(json!({"namePath": "Calc/add"})).unwrap();
        assert_eq!(params.name_path, "Calc/add");
        assert!(!params.substring);
        assert_eq!(params.max_results, 50);
        assert!(params.scope.is_none());
    }

    #[test]
    fn test_parse_kinds() {
        let kinds = parse_kinds(&Some(vec!["class".into(), "method".into()])).unwrap();
        assert_eq!(
            kinds,
            vec![lsp_types::SymbolKind::CLASS, lsp_types::SymbolKind::METHOD]
        );
        assert!(parse_kinds(&Some(vec!["gadget".into()])).is_err());
        assert!(parse_kinds(&None).unwrap().is_empty());
    }

    #[test]
    fn test_schema_declares_required_fields() {
        let schema = FindSymbolTool::new(&Arc::new(Agent::new(
            crate::config::ServerRegistry::default(),
        )))
        .schema();
        let required = schema["required"]
            .as_array()
            .expect("schema has required list");
        assert!(required.contains(&json!("namePath")));
        assert!(!required.contains(&json!("scope")));
    }

    #[test]
    fn test_hover_text_shapes() {
        use lsp_types::{HoverContents, MarkedString, MarkupContent, MarkupKind};
        assert_eq!(
            hover_text(HoverContents::Scalar(MarkedString::String("doc".into()))),
            "doc"
        );
        let lang = lsp_types::LanguageString {
            language: "python".into(),
            value: "def add(a, b)".into(),
        };
        assert_eq!(
            hover_text(HoverContents::Scalar(MarkedString::LanguageString(lang))),
            "```python\ndef add(a, b)\n```"
        );
        assert_eq!(
            hover_text(HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: "**bold**".into(),
            })),
            "**bold**"
        );
    }
}
