//! Symbol-scoped file edits.
//!
//! Every mutation runs the same compound sequence under a per-file mutex:
//! read the file, check the content hash against the one captured at symbol
//! resolution, splice, write atomically (temp + rename), push `didChange` to
//! the owning server, evict the file's cache records. A reader of another
//! file never observes torn content, and no file is left open at an older
//! version than its on-disk content.
//!
//! Each file's application is shielded from caller cancellation: a tool
//! timeout mid-rename finishes the file being written and stops before the
//! next one.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lsp_types::{DocumentChangeOperation, DocumentChanges, OneOf, TextEdit, WorkspaceEdit};
use serde::Serialize;

use crate::error::ToolError;
use crate::lsp::manager::LanguageServerManager;
use crate::lsp::types::{range_to_byte_span, url_to_path};
use crate::symbols::cache::{SymbolCache, content_hash};
use crate::symbols::retriever::ResolvedSymbol;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where new text lands relative to the symbol's range.
#[derive(Debug, Clone)]
enum Splice {
    /// Replace `[range.start, range.end)`.
    ReplaceBody(String),
    /// Insert at `range.start`.
    Before(String),
    /// Insert at `range.end`.
    After(String),
}

/// Result of a successful multi-file rename.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedRename {
    /// Files rewritten, in application order.
    pub files: Vec<PathBuf>,
    /// Total number of text edits applied.
    pub edit_count: usize,
}

/// Applies symbol-scoped edits and keeps the server fleet's view in sync.
#[derive(Debug)]
pub struct EditEngine {
    manager: Arc<LanguageServerManager>,
    cache: Arc<SymbolCache>,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl EditEngine {
    /// Engine over a project's fleet and cache.
    pub fn new(manager: Arc<LanguageServerManager>, cache: Arc<SymbolCache>) -> Self {
        Self {
            manager,
            cache,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn file_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .expect("file lock table")
                .entry(path.to_path_buf())
                .or_default(),
        )
    }

    /// Replaces the symbol's body with `new_text`, written verbatim; callers
    /// own leading indentation. Fails with `EditConflict` when the file
    /// changed since resolution.
    pub async fn replace_body(
        &self,
        symbol: &ResolvedSymbol,
        new_text: &str,
    ) -> Result<(), ToolError> {
        self.splice(symbol, Splice::ReplaceBody(new_text.to_string()))
            .await
    }

    /// Inserts `text` immediately before the symbol's range. No reflow.
    pub async fn insert_before(
        &self,
        symbol: &ResolvedSymbol,
        text: &str,
    ) -> Result<(), ToolError> {
        self.splice(symbol, Splice::Before(text.to_string())).await
    }

    /// Inserts `text` immediately after the symbol's range. No reflow.
    pub async fn insert_after(
        &self,
        symbol: &ResolvedSymbol,
        text: &str,
    ) -> Result<(), ToolError> {
        self.splice(symbol, Splice::After(text.to_string())).await
    }

    async fn splice(&self, symbol: &ResolvedSymbol, splice: Splice) -> Result<(), ToolError> {
        let manager = Arc::clone(&self.manager);
        let cache = Arc::clone(&self.cache);
        let lock = self.file_lock(&symbol.file_path);
        let path = symbol.file_path.clone();
        let expected_hash = symbol.content_hash.clone();
        let range = symbol.node().range;

        // Spawned so a cancelled tool still leaves the write + didChange
        // pair complete.
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            let current = tokio::fs::read_to_string(&path).await?;
            if content_hash(current.as_bytes()) != expected_hash {
                return Err(ToolError::EditConflict { path });
            }

            let span = range_to_byte_span(&current, range);
            let mut content = current;
            match &splice {
                Splice::ReplaceBody(text) => content.replace_range(span, text),
                Splice::Before(text) => content.insert_str(span.start, text),
                Splice::After(text) => content.insert_str(span.end, text),
            }

            write_atomic(&path, &content)?;
            let server = manager.server_for(&path).await?;
            server.did_change_to(&path, &content).await?;
            cache.evict(&path);
            Ok(())
        })
        .await
        .map_err(|e| ToolError::Io(std::io::Error::other(e)))?
    }

    /// Renames the symbol via the owning server's `WorkspaceEdit`.
    ///
    /// Files apply in lexical path order; edits within a file apply in
    /// reverse document order so earlier edits do not shift later ones. On
    /// the first failure the apply halts and reports the completed and
    /// pending sets; completed files stay on disk.
    pub async fn rename(
        &self,
        symbol: &ResolvedSymbol,
        new_name: &str,
    ) -> Result<AppliedRename, ToolError> {
        let current = tokio::fs::read(&symbol.file_path).await?;
        if content_hash(&current) != symbol.content_hash {
            return Err(ToolError::EditConflict {
                path: symbol.file_path.clone(),
            });
        }

        let server = self.manager.server_for(&symbol.file_path).await?;
        let edit = server
            .rename(
                &symbol.file_path,
                symbol.node().selection_range.start,
                new_name,
            )
            .await?;

        let by_file = collect_edits(edit)?;
        let files: Vec<PathBuf> = by_file.keys().cloned().collect();
        let edit_count = by_file.values().map(Vec::len).sum();

        let mut completed: Vec<PathBuf> = Vec::new();
        for (path, edits) in by_file {
            let outcome = tokio::spawn(apply_file_edits(
                Arc::clone(&self.manager),
                Arc::clone(&self.cache),
                self.file_lock(&path),
                path.clone(),
                edits,
            ))
            .await
            .map_err(|e| ToolError::Io(std::io::Error::other(e)))?;

            match outcome {
                Ok(()) => completed.push(path),
                Err(e) => {
                    let pending = files
                        .iter()
                        .filter(|f| !completed.contains(f))
                        .cloned()
                        .collect();
                    return Err(ToolError::PartialEdit {
                        completed,
                        pending,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(AppliedRename {
            files: completed,
            edit_count,
        })
    }
}

/// Rewrites one file under its lock and resyncs the server.
async fn apply_file_edits(
    manager: Arc<LanguageServerManager>,
    cache: Arc<SymbolCache>,
    lock: Arc<tokio::sync::Mutex<()>>,
    path: PathBuf,
    edits: Vec<TextEdit>,
) -> Result<(), ToolError> {
    let _guard = lock.lock().await;
    let current = tokio::fs::read_to_string(&path).await?;
    let content = apply_edits_to_content(&current, &edits);
    write_atomic(&path, &content)?;

    if manager.supports(&path) {
        let server = manager.server_for(&path).await?;
        server.did_change_to(&path, &content).await?;
    }
    cache.evict(&path);
    Ok(())
}

/// Applies non-overlapping edits in reverse document order.
fn apply_edits_to_content(content: &str, edits: &[TextEdit]) -> String {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| b.range.start.cmp(&a.range.start));

    let mut out = content.to_string();
    for edit in ordered {
        let span = range_to_byte_span(&out, edit.range);
        out.replace_range(span, &edit.new_text);
    }
    out
}

/// Flattens a `WorkspaceEdit` into per-file edit lists, keyed in lexical
/// path order. Resource operations (create/rename/delete) are refused.
fn collect_edits(edit: WorkspaceEdit) -> Result<BTreeMap<PathBuf, Vec<TextEdit>>, ToolError> {
    let mut by_file: BTreeMap<PathBuf, Vec<TextEdit>> = BTreeMap::new();

    if let Some(changes) = edit.changes {
        for (uri, edits) in changes {
            let path = url_to_path(&uri).map_err(ToolError::Lsp)?;
            by_file.entry(path).or_default().extend(edits);
        }
    }

    if let Some(document_changes) = edit.document_changes {
        let edits = match document_changes {
            DocumentChanges::Edits(edits) => edits,
            DocumentChanges::Operations(operations) => operations
                .into_iter()
                .map(|op| match op {
                    DocumentChangeOperation::Edit(edit) => Ok(edit),
                    DocumentChangeOperation::Op(_) => Err(ToolError::InvalidInput(
                        "workspace edit contains file operations, which are not applied"
                            .to_string(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        for doc_edit in edits {
            let path = url_to_path(&doc_edit.text_document.uri).map_err(ToolError::Lsp)?;
            let flattened = doc_edit.edits.into_iter().map(|e| match e {
                OneOf::Left(text_edit) => text_edit,
                OneOf::Right(annotated) => annotated.text_edit,
            });
            by_file.entry(path).or_default().extend(flattened);
        }
    }

    Ok(by_file)
}

/// Writes the whole file as one temp-file-plus-rename; either the new
/// content lands or the old content remains.
fn write_atomic(path: &Path, content: &str) -> Result<(), ToolError> {
    let parent = path.parent().ok_or_else(|| {
        ToolError::Io(std::io::Error::other(format!(
            "no parent directory for {}",
            path.display()
        )))
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let temp = parent.join(format!(
        ".{file_name}.tmp.{}.{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&temp, content)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}
