//! A minimal scriptable language server used by the integration tests.
//!
//! Speaks real LSP framing over stdio and implements just enough of the
//! protocol to exercise the client stack end to end: initialize/shutdown,
//! document sync, document symbols for a small Python subset (classes,
//! methods, functions, top-level assignments), plus word-based references,
//! definition, hover and rename over every `.py` file in the workspace.
//!
//! With `--flat` it answers `documentSymbol` with the flat
//! `SymbolInformation` variant instead of the hierarchical one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tokio::io::BufReader;

use kadabra_sigils::lsp::transport::{read_frame, write_frame};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let flat = std::env::args().any(|a| a == "--flat");
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let mut state = StubState {
        root: PathBuf::from("."),
        open: HashMap::new(),
        flat,
    };

    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            _ => break,
        };
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match message.get("id").cloned() {
            Some(id) => {
                let reply = match state.handle_request(&method, &params) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err((code, msg)) => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": code, "message": msg},
                    }),
                };
                if write_frame(&mut writer, &reply).await.is_err() {
                    break;
                }
            }
            None => {
                if method == "exit" {
                    break;
                }
                if let Some(outbound) = state.handle_notification(&method, &params) {
                    if write_frame(&mut writer, &outbound).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

struct StubState {
    root: PathBuf,
    open: HashMap<String, String>,
    flat: bool,
}

type RequestResult = Result<Value, (i64, String)>;

impl StubState {
    fn handle_request(&mut self, method: &str, params: &Value) -> RequestResult {
        match method {
            "initialize" => {
                if let Some(uri) = params
                    .pointer("/workspaceFolders/0/uri")
                    .or_else(|| params.get("rootUri"))
                    .and_then(Value::as_str)
                {
                    if let Some(path) = uri.strip_prefix("file://") {
                        self.root = PathBuf::from(path);
                    }
                }
                Ok(json!({
                    "capabilities": {
                        "textDocumentSync": 1,
                        "documentSymbolProvider": true,
                        "referencesProvider": true,
                        "definitionProvider": true,
                        "hoverProvider": true,
                        "renameProvider": true,
                    },
                    "serverInfo": {"name": "stub-ls"},
                }))
            }
            "shutdown" => Ok(Value::Null),
            "textDocument/documentSymbol" => {
                let uri = text_document_uri(params)?;
                let text = self.text_of(&uri)?;
                let symbols = py_document_symbols(&text);
                if self.flat {
                    Ok(Value::Array(flatten_symbols(&symbols, &uri, None)))
                } else {
                    Ok(Value::Array(symbols))
                }
            }
            "textDocument/references" => {
                let uri = text_document_uri(params)?;
                let include_declaration = params
                    .pointer("/context/includeDeclaration")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let word = self.word_at_params(&uri, params)?;
                Ok(Value::Array(self.scan_workspace(&word, |line, range| {
                    include_declaration || !is_declaration(line, range)
                })))
            }
            "textDocument/definition" => {
                let uri = text_document_uri(params)?;
                let word = self.word_at_params(&uri, params)?;
                Ok(Value::Array(
                    self.scan_workspace(&word, |line, range| is_declaration(line, range)),
                ))
            }
            "textDocument/hover" => {
                let uri = text_document_uri(params)?;
                match self.word_at_params(&uri, params) {
                    Ok(word) => Ok(json!({
                        "contents": {
                            "kind": "markdown",
                            "value": format!("symbol `{word}`"),
                        }
                    })),
                    Err(_) => Ok(Value::Null),
                }
            }
            "textDocument/rename" => {
                let uri = text_document_uri(params)?;
                let new_name = params
                    .get("newName")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let word = self
                    .word_at_params(&uri, params)
                    .map_err(|_| (-32602i64, "cannot rename here".to_string()))?;

                let mut changes = serde_json::Map::new();
                for file in py_files(&self.root) {
                    let Some(text) = self.file_text(&file) else {
                        continue;
                    };
                    let edits: Vec<Value> = occurrences(&text, &word)
                        .into_iter()
                        .map(|range| json!({"range": range, "newText": new_name}))
                        .collect();
                    if !edits.is_empty() {
                        changes.insert(file_uri(&file), Value::Array(edits));
                    }
                }
                Ok(json!({"changes": changes}))
            }
            other => Err((-32601, format!("method not found: {other}"))),
        }
    }

    /// Handles a client notification; may return a notification to send
    /// back (diagnostics are published on every open and change).
    fn handle_notification(&mut self, method: &str, params: &Value) -> Option<Value> {
        match method {
            "textDocument/didOpen" => {
                let uri = params.pointer("/textDocument/uri")?.as_str()?.to_string();
                let text = params.pointer("/textDocument/text")?.as_str()?.to_string();
                self.open.insert(uri.clone(), text.clone());
                Some(publish_diagnostics(&uri, &text))
            }
            "textDocument/didChange" => {
                let uri = params.pointer("/textDocument/uri")?.as_str()?.to_string();
                let text = params
                    .pointer("/contentChanges/0/text")?
                    .as_str()?
                    .to_string();
                self.open.insert(uri.clone(), text.clone());
                Some(publish_diagnostics(&uri, &text))
            }
            "textDocument/didClose" => {
                if let Some(uri) = params.pointer("/textDocument/uri").and_then(Value::as_str) {
                    self.open.remove(uri);
                }
                None
            }
            _ => None,
        }
    }

    fn text_of(&self, uri: &str) -> Result<String, (i64, String)> {
        if let Some(text) = self.open.get(uri) {
            return Ok(text.clone());
        }
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        std::fs::read_to_string(path).map_err(|e| (-32602, format!("cannot read {uri}: {e}")))
    }

    fn file_text(&self, path: &Path) -> Option<String> {
        let uri = file_uri(path);
        if let Some(text) = self.open.get(&uri) {
            return Some(text.clone());
        }
        std::fs::read_to_string(path).ok()
    }

    fn word_at_params(&self, uri: &str, params: &Value) -> Result<String, (i64, String)> {
        let line = position_of(params, "line");
        let character = position_of(params, "character");
        let text = self.text_of(uri)?;
        word_at(&text, line, character).ok_or((-32602, "no symbol at position".to_string()))
    }

    fn scan_workspace<F>(&self, word: &str, keep: F) -> Vec<Value>
    where
        F: Fn(&str, &Value) -> bool,
    {
        let mut locations = Vec::new();
        for file in py_files(&self.root) {
            let Some(text) = self.file_text(&file) else {
                continue;
            };
            let lines: Vec<&str> = text.lines().collect();
            for range in occurrences(&text, word) {
                let line_idx = range["start"]["line"].as_u64().unwrap_or(0) as usize;
                let line = lines.get(line_idx).copied().unwrap_or_default();
                if keep(line, &range) {
                    locations.push(json!({"uri": file_uri(&file), "range": range}));
                }
            }
        }
        locations
    }
}

/// One warning per line containing `fixme`, so clients can observe the
/// diagnostics channel deterministically.
fn publish_diagnostics(uri: &str, text: &str) -> Value {
    let diagnostics: Vec<Value> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains("fixme"))
        .map(|(i, line)| {
            json!({
                "range": range_json(i, 0, i, line.len()),
                "severity": 2,
                "message": "flagged line",
            })
        })
        .collect();
    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {"uri": uri, "diagnostics": diagnostics},
    })
}

fn text_document_uri(params: &Value) -> Result<String, (i64, String)> {
    params
        .pointer("/textDocument/uri")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or((-32602, "missing textDocument.uri".to_string()))
}

fn position_of(params: &Value, field: &str) -> usize {
    params
        .pointer(&format!("/position/{field}"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn word_at(text: &str, line: usize, character: usize) -> Option<String> {
    let line = text.lines().nth(line)?;
    let chars: Vec<char> = line.chars().collect();
    if character >= chars.len() || !is_ident(chars[character]) {
        return None;
    }
    let mut start = character;
    while start > 0 && is_ident(chars[start - 1]) {
        start -= 1;
    }
    let mut end = character;
    while end < chars.len() && is_ident(chars[end]) {
        end += 1;
    }
    Some(chars[start..end].iter().collect())
}

fn occurrences(text: &str, word: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        let word_chars: Vec<char> = word.chars().collect();
        let mut i = 0;
        while i + word_chars.len() <= chars.len() {
            let matches = chars[i..i + word_chars.len()] == word_chars[..]
                && (i == 0 || !is_ident(chars[i - 1]))
                && (i + word_chars.len() == chars.len() || !is_ident(chars[i + word_chars.len()]));
            if matches {
                out.push(json!({
                    "start": {"line": line_idx, "character": i},
                    "end": {"line": line_idx, "character": i + word_chars.len()},
                }));
                i += word_chars.len();
            } else {
                i += 1;
            }
        }
    }
    out
}

fn is_declaration(line: &str, range: &Value) -> bool {
    let start = range["start"]["character"].as_u64().unwrap_or(0) as usize;
    let prefix: String = line.chars().take(start).collect();
    let prefix = prefix.trim_start();
    prefix.ends_with("def ") || prefix.ends_with("class ")
}

fn py_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')) {
                    continue;
                }
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "py") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn ident_prefix(s: &str) -> &str {
    let end = s.find(|c: char| !is_ident(c)).unwrap_or(s.len());
    &s[..end]
}

/// Last line of the block opened at `start` whose body is indented deeper
/// than `indent`.
fn block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = start;
    let mut i = start + 1;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        let line_indent = line.len() - line.trim_start().len();
        if line_indent > indent {
            end = i;
            i += 1;
        } else {
            break;
        }
    }
    end
}

fn range_json(start_line: usize, start_char: usize, end_line: usize, end_char: usize) -> Value {
    json!({
        "start": {"line": start_line, "character": start_char},
        "end": {"line": end_line, "character": end_char},
    })
}

fn py_document_symbols(text: &str) -> Vec<Value> {
    let lines: Vec<&str> = text.lines().collect();
    let mut symbols = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("class ") {
            let name = ident_prefix(rest);
            if name.is_empty() {
                continue;
            }
            let end = block_end(&lines, i, 0);
            let mut children = Vec::new();
            let mut j = i + 1;
            while j <= end {
                if let Some(rest) = lines[j].strip_prefix("    def ") {
                    let method = ident_prefix(rest);
                    if !method.is_empty() {
                        let method_end = block_end(&lines, j, 4);
                        children.push(json!({
                            "name": method,
                            "kind": 6,
                            "range": range_json(j, 4, method_end, lines[method_end].len()),
                            "selectionRange": range_json(j, 8, j, 8 + method.len()),
                        }));
                        j = method_end + 1;
                        continue;
                    }
                }
                j += 1;
            }
            symbols.push(json!({
                "name": name,
                "kind": 5,
                "range": range_json(i, 0, end, lines[end].len()),
                "selectionRange": range_json(i, 6, i, 6 + name.len()),
                "children": children,
            }));
        } else if let Some(rest) = line.strip_prefix("def ") {
            let name = ident_prefix(rest);
            if name.is_empty() {
                continue;
            }
            let end = block_end(&lines, i, 0);
            symbols.push(json!({
                "name": name,
                "kind": 12,
                "range": range_json(i, 0, end, lines[end].len()),
                "selectionRange": range_json(i, 4, i, 4 + name.len()),
            }));
        } else if !line.starts_with(char::is_whitespace) {
            let name = ident_prefix(line);
            if !name.is_empty() && line[name.len()..].trim_start().starts_with('=') {
                symbols.push(json!({
                    "name": name,
                    "kind": 13,
                    "range": range_json(i, 0, i, line.len()),
                    "selectionRange": range_json(i, 0, i, name.len()),
                }));
            }
        }
    }
    symbols
}

fn flatten_symbols(symbols: &[Value], uri: &str, container: Option<&str>) -> Vec<Value> {
    let mut out = Vec::new();
    for symbol in symbols {
        let name = symbol["name"].as_str().unwrap_or_default();
        let mut info = json!({
            "name": name,
            "kind": symbol["kind"],
            "location": {"uri": uri, "range": symbol["range"]},
        });
        if let Some(container) = container {
            info["containerName"] = json!(container);
        }
        out.push(info);
        if let Some(children) = symbol["children"].as_array() {
            out.extend(flatten_symbols(children, uri, Some(name)));
        }
    }
    out
}
