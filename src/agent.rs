//! The agent: an explicit value owning the active project.
//!
//! Exactly one project is active at a time; that is an invariant of this
//! value, not of the process. Activating a different root first shuts down
//! the previous fleet. Reactivation rebuilds the fleet for the current root,
//! which is how failed language servers come back (failures otherwise stay
//! failed, so they are observable).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ServerRegistry;
use crate::edit::engine::EditEngine;
use crate::error::ToolError;
use crate::lsp::manager::LanguageServerManager;
use crate::symbols::cache::SymbolCache;
use crate::symbols::retriever::SymbolRetriever;

/// One activated project root and the machinery bound to it.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    manager: Arc<LanguageServerManager>,
    cache: Arc<SymbolCache>,
    retriever: SymbolRetriever,
    edits: EditEngine,
}

impl Project {
    fn open(root: PathBuf, registry: ServerRegistry) -> Self {
        let cache = Arc::new(SymbolCache::for_project(&root));
        let manager = Arc::new(LanguageServerManager::new(
            root.clone(),
            registry,
            Arc::clone(&cache),
        ));
        let retriever = SymbolRetriever::new(Arc::clone(&manager));
        let edits = EditEngine::new(Arc::clone(&manager), Arc::clone(&cache));
        Self {
            root,
            manager,
            cache,
            retriever,
            edits,
        }
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The language server fleet.
    pub fn manager(&self) -> &Arc<LanguageServerManager> {
        &self.manager
    }

    /// The project's symbol cache.
    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.cache
    }

    /// Symbol queries.
    pub fn retriever(&self) -> &SymbolRetriever {
        &self.retriever
    }

    /// Symbol-scoped edits.
    pub fn edits(&self) -> &EditEngine {
        &self.edits
    }
}

/// Process-wide agent state, passed explicitly to the tool layer.
pub struct Agent {
    registry: ServerRegistry,
    active: tokio::sync::Mutex<Option<Arc<Project>>>,
}

impl Agent {
    /// Agent with a server registry and no active project.
    pub fn new(registry: ServerRegistry) -> Self {
        Self {
            registry,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Activates the project at `root`.
    ///
    /// Re-activating the same canonical root is a no-op. Activating a
    /// different root shuts down the previous fleet first.
    pub async fn activate_project(&self, root: &Path) -> Result<Arc<Project>, ToolError> {
        let canonical = root.canonicalize().map_err(ToolError::Io)?;
        let mut active = self.active.lock().await;

        if let Some(project) = active.as_ref() {
            if project.root() == canonical {
                return Ok(Arc::clone(project));
            }
            tracing::info!(
                previous = %project.root().display(),
                next = %canonical.display(),
                "switching projects"
            );
            project.manager().shutdown_all().await;
        }

        let project = Arc::new(Project::open(canonical, self.registry.clone()));
        *active = Some(Arc::clone(&project));
        Ok(project)
    }

    /// Tears down and rebuilds the fleet for the current root. This is the
    /// recovery path after a language server failure.
    pub async fn reactivate(&self) -> Result<Arc<Project>, ToolError> {
        let mut active = self.active.lock().await;
        let previous = active.take().ok_or(ToolError::NoActiveProject)?;
        previous.manager().shutdown_all().await;

        let project = Arc::new(Project::open(
            previous.root().to_path_buf(),
            self.registry.clone(),
        ));
        *active = Some(Arc::clone(&project));
        Ok(project)
    }

    /// The active project, or `NoActiveProject`.
    pub async fn project(&self) -> Result<Arc<Project>, ToolError> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(ToolError::NoActiveProject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_active_project() {
        let agent = Agent::new(ServerRegistry::default());
        assert!(matches!(
            agent.project().await.unwrap_err(),
            ToolError::NoActiveProject
        ));
        assert!(matches!(
            agent.reactivate().await.unwrap_err(),
            ToolError::NoActiveProject
        ));
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new(ServerRegistry::default());

        let first = agent.activate_project(dir.path()).await.unwrap();
        let second = agent.activate_project(dir.path()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_switching_projects() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let agent = Agent::new(ServerRegistry::default());

        let a = agent.activate_project(dir_a.path()).await.unwrap();
        let b = agent.activate_project(dir_b.path()).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.root(), b.root());
        assert_eq!(agent.project().await.unwrap().root(), b.root());
    }

    #[tokio::test]
    async fn test_reactivate_rebuilds_fleet_for_same_root() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new(ServerRegistry::default());

        let before = agent.activate_project(dir.path()).await.unwrap();
        let after = agent.reactivate().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.root(), after.root());
    }

    #[tokio::test]
    async fn test_activate_missing_root_fails() {
        let agent = Agent::new(ServerRegistry::default());
        let err = agent
            .activate_project(Path::new("/nonexistent/project/root"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
