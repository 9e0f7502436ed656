//! High-level, language-agnostic symbol queries.
//!
//! The retriever turns name-path queries into per-file symbol tree fetches
//! through the manager, and resolves reference locations back to their
//! enclosing symbols.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsp_types::Location;

use crate::error::ToolError;
use crate::lsp::manager::LanguageServerManager;
use crate::lsp::types::url_to_path;

use super::model::{FindOptions, NamePath, SymbolId, SymbolNode, SymbolTree};

/// A symbol pinned to the file and content version it was found in.
///
/// The content hash lets the edit engine detect when the file drifted
/// between resolution and write.
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    /// Canonical path of the file the symbol lives in.
    pub file_path: PathBuf,
    /// The file's symbol tree at resolution time.
    pub tree: Arc<SymbolTree>,
    /// The symbol inside `tree`.
    pub id: SymbolId,
    /// Hash of the content `tree` was built from.
    pub content_hash: String,
}

impl ResolvedSymbol {
    /// Borrows the underlying node.
    pub fn node(&self) -> &SymbolNode {
        self.tree.get(self.id)
    }

    /// Absolute name-path of the symbol within its file.
    pub fn name_path(&self) -> NamePath {
        self.tree.name_path_of(self.id)
    }
}

/// One line of a file overview.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverviewEntry {
    /// Absolute name-path within the file.
    pub name_path: String,
    /// Human-readable symbol kind.
    pub kind: &'static str,
}

/// Name-path queries across a project.
#[derive(Debug, Clone)]
pub struct SymbolRetriever {
    manager: Arc<LanguageServerManager>,
}

impl SymbolRetriever {
    /// Retriever over a project's server fleet.
    pub fn new(manager: Arc<LanguageServerManager>) -> Self {
        Self { manager }
    }

    /// Finds symbols matching `name_path` under `scope` (a file or a
    /// directory). Directory scopes are filtered to supported languages and
    /// visited in lexical path order; results merge until
    /// `opts.max_results`.
    pub async fn find_by_name(
        &self,
        name_path: &NamePath,
        scope: &Path,
        opts: &FindOptions,
    ) -> Result<Vec<ResolvedSymbol>, ToolError> {
        let files = self.files_in_scope(scope)?;
        let mut results: Vec<ResolvedSymbol> = Vec::new();

        for file in files {
            if results.len() >= opts.max_results {
                break;
            }
            let mut remaining = opts.clone();
            remaining.max_results = opts.max_results - results.len();

            let server = self.manager.server_for(&file).await?;
            let (tree, hash) = server.document_symbols(&file).await?;
            for id in tree.find_by_name_path(name_path, &remaining) {
                results.push(ResolvedSymbol {
                    file_path: file.clone(),
                    tree: Arc::clone(&tree),
                    id,
                    content_hash: hash.clone(),
                });
            }
        }
        Ok(results)
    }

    /// Resolves `name_path` to exactly one symbol in `file`.
    pub async fn resolve_unique(
        &self,
        name_path: &NamePath,
        file: &Path,
    ) -> Result<ResolvedSymbol, ToolError> {
        let mut hits = self
            .find_by_name(name_path, file, &FindOptions::default())
            .await?;
        match hits.len() {
            0 => Err(ToolError::SymbolNotFound(format!(
                "{name_path} in {}",
                file.display()
            ))),
            1 => Ok(hits.remove(0)),
            count => Err(ToolError::AmbiguousSymbol {
                name_path: name_path.to_string(),
                count,
            }),
        }
    }

    /// Finds the symbols that reference `symbol`.
    ///
    /// Issues `references` at the symbol's selection start, then resolves
    /// each returned location to the smallest enclosing symbol in that
    /// file's tree. Locations outside every symbol are dropped.
    pub async fn find_referencing(
        &self,
        symbol: &ResolvedSymbol,
    ) -> Result<Vec<(ResolvedSymbol, Location)>, ToolError> {
        let server = self.manager.server_for(&symbol.file_path).await?;
        let locations = server
            .references(
                &symbol.file_path,
                symbol.node().selection_range.start,
                false,
            )
            .await?;

        let mut out = Vec::new();
        for location in locations {
            let path = url_to_path(&location.uri).map_err(ToolError::Lsp)?;
            if !self.manager.supports(&path) {
                continue;
            }
            let server = self.manager.server_for(&path).await?;
            let (tree, hash) = server.document_symbols(&path).await?;
            if let Some(id) = tree.smallest_enclosing(location.range.start) {
                out.push((
                    ResolvedSymbol {
                        file_path: path,
                        tree: Arc::clone(&tree),
                        id,
                        content_hash: hash,
                    },
                    location,
                ));
            }
        }
        Ok(out)
    }

    /// Top-level and one-level-deep symbols of a file, in pre-order.
    pub async fn overview(&self, path: &Path) -> Result<Vec<OverviewEntry>, ToolError> {
        let file = self.absolutize(path);
        let server = self.manager.server_for(&file).await?;
        let (tree, _) = server.document_symbols(&file).await?;

        let mut entries = Vec::new();
        for &root in tree.roots() {
            entries.push(entry_for(&tree, root));
            for &child in &tree.get(root).children {
                entries.push(entry_for(&tree, child));
            }
        }
        Ok(entries)
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manager.root().join(path)
        }
    }

    /// Candidate files for a scope: the file itself, or every supported file
    /// under the directory in lexical order. Walks respect `.gitignore`.
    fn files_in_scope(&self, scope: &Path) -> Result<Vec<PathBuf>, ToolError> {
        let scope = self.absolutize(scope);
        let metadata = std::fs::metadata(&scope).map_err(ToolError::Io)?;

        if metadata.is_file() {
            if !self.manager.supports(&scope) {
                return Err(ToolError::UnsupportedLanguage(scope.display().to_string()));
            }
            return Ok(vec![scope]);
        }

        let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(&scope)
            .hidden(true)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| self.manager.supports(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

fn entry_for(tree: &SymbolTree, id: SymbolId) -> OverviewEntry {
    OverviewEntry {
        name_path: tree.name_path_of(id).to_string(),
        kind: crate::lsp::types::symbol_kind_name(tree.get(id).kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerRegistry;
    use crate::symbols::cache::SymbolCache;
    use tempfile::TempDir;

    fn retriever_for(root: &Path) -> SymbolRetriever {
        let cache = Arc::new(SymbolCache::new(root.join("cache")));
        let manager = Arc::new(LanguageServerManager::new(
            root.to_path_buf(),
            ServerRegistry::default(),
            cache,
        ));
        SymbolRetriever::new(manager)
    }

    #[test]
    fn test_files_in_scope_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("b.py"), "").unwrap();
        std::fs::write(dir.path().join("a.py"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("pkg/c.py"), "").unwrap();

        let retriever = retriever_for(dir.path());
        let files = retriever.files_in_scope(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.py", "b.py", "pkg/c.py"]);
    }

    #[test]
    fn test_files_in_scope_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        // The ignore walker honors .gitignore inside git repositories.
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "generated.py\n").unwrap();
        std::fs::write(dir.path().join("kept.py"), "").unwrap();
        std::fs::write(dir.path().join("generated.py"), "").unwrap();

        let retriever = retriever_for(dir.path());
        let files = retriever.files_in_scope(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("kept.py"));
    }

    #[test]
    fn test_single_file_scope() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let retriever = retriever_for(dir.path());
        // Relative scopes resolve against the project root.
        let files = retriever.files_in_scope(Path::new("a.py")).unwrap();
        assert_eq!(files, vec![dir.path().join("a.py")]);

        let err = retriever
            .files_in_scope(Path::new("notes.txt"))
            .unwrap_err();
        assert!(matches!(err, ToolError::UnsupportedLanguage(_)));

        let err = retriever.files_in_scope(Path::new("missing.py")).unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
