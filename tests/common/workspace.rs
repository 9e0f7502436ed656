//! Temp-dir workspaces wired to the stub language server.
//!
//! The stub (`src/bin/stub_ls.rs`) is spawned as a real subprocess through
//! the same transport the production servers use, so these tests exercise
//! process management, framing, the handshake, and document sync for real.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use kadabra_sigils::agent::{Agent, Project};
use kadabra_sigils::config::{Language, ServerCommand, ServerRegistry, Timeouts};

/// Registry whose Python server is the stub binary.
pub fn stub_registry(flat: bool) -> ServerRegistry {
    let mut registry = ServerRegistry::default();
    let mut args = Vec::new();
    if flat {
        args.push("--flat".to_string());
    }
    registry.set(
        Language::Python,
        ServerCommand {
            command: env!("CARGO_BIN_EXE_stub_ls").to_string(),
            args,
        },
    );
    registry.timeouts = Timeouts {
        startup: Duration::from_secs(10),
        request: Duration::from_secs(5),
        shutdown: Duration::from_millis(500),
    };
    registry
}

/// A workspace of fixture files with an activated project over the stub.
pub struct TestWorkspace {
    /// Keeps the temp dir alive for the test's duration.
    pub root: TempDir,
    /// The agent owning the project.
    pub agent: Arc<Agent>,
    /// The activated project.
    pub project: Arc<Project>,
}

impl TestWorkspace {
    /// Workspace with the hierarchical stub.
    pub async fn with_files(files: &[(&str, &str)]) -> Self {
        Self::new(files, false).await
    }

    /// Workspace with the stub answering in the flat symbol variant.
    pub async fn with_files_flat(files: &[(&str, &str)]) -> Self {
        Self::new(files, true).await
    }

    async fn new(files: &[(&str, &str)], flat: bool) -> Self {
        let root = TempDir::new().expect("failed to create temp workspace");
        for (rel, content) in files {
            let path = root.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir failed");
            }
            std::fs::write(&path, content).expect("fixture write failed");
        }

        let agent = Arc::new(Agent::new(stub_registry(flat)));
        let project = agent
            .activate_project(root.path())
            .await
            .expect("project activation failed");

        Self {
            root,
            agent,
            project,
        }
    }

    /// Absolute path of a fixture file (under the canonicalized root).
    pub fn apath(&self, rel: &str) -> PathBuf {
        self.project.root().join(rel)
    }

    /// Reads a fixture file's current content.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.apath(rel)).expect("fixture read failed")
    }

    /// Overwrites a fixture file, bypassing the edit engine (external
    /// mutation, as another editor would do it).
    pub fn write_externally(&self, rel: &str, content: &str) {
        std::fs::write(self.apath(rel), content).expect("fixture write failed");
    }
}
