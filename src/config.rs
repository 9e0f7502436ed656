//! Language registry and timeout configuration.
//!
//! Maps file extensions to languages and languages to the language server
//! command that handles them. The registry ships with defaults for the common
//! servers and can be overridden per language from the command line
//! (`--language-server LANG=CMD[,ARG...]`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Languages with a configurable language server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Rust (`.rs`).
    Rust,
    /// Python (`.py`, `.pyi`).
    Python,
    /// TypeScript (`.ts`, `.tsx`).
    TypeScript,
    /// JavaScript (`.js`, `.jsx`).
    JavaScript,
    /// Go (`.go`).
    Go,
    /// C (`.c`, `.h`).
    C,
    /// C++ (`.cpp`, `.cc`, `.cxx`, `.hpp`).
    Cpp,
    /// Java (`.java`).
    Java,
}

impl Language {
    /// Determines the language from a file path, by extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        match ext {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "ts" | "tsx" => Some(Self::TypeScript),
            "js" | "jsx" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" => Some(Self::Cpp),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    /// LSP `languageId` for `textDocument/didOpen`.
    pub fn language_id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Go => "go",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    /// Name used in CLI overrides and log lines.
    pub fn name(self) -> &'static str {
        self.language_id()
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "rust" => Some(Self::Rust),
            "python" => Some(Self::Python),
            "typescript" => Some(Self::TypeScript),
            "javascript" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            "java" => Some(Self::Java),
            _ => None,
        }
    }
}

/// Command line for one language server.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// Executable to spawn.
    pub command: String,
    /// Arguments to pass.
    pub args: Vec<String>,
}

impl ServerCommand {
    fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Identifier for cache keying and diagnostics. Switching a project's
    /// server changes this and therefore the cache key.
    pub fn ls_id(&self) -> &str {
        &self.command
    }
}

/// Timeouts applied to language server interactions.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Deadline for the initialize handshake.
    pub startup: Duration,
    /// Deadline for a single request.
    pub request: Duration,
    /// Deadline for graceful shutdown before the process is killed.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(30),
            request: Duration::from_secs(60),
            shutdown: Duration::from_secs(5),
        }
    }
}

/// Registry of language server commands by language.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    servers: HashMap<Language, ServerCommand>,
    /// Timeouts shared by every server in the registry.
    pub timeouts: Timeouts,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        let mut servers = HashMap::new();
        servers.insert(Language::Rust, ServerCommand::new("rust-analyzer", &[]));
        servers.insert(Language::Python, ServerCommand::new("pylsp", &[]));
        servers.insert(
            Language::TypeScript,
            ServerCommand::new("typescript-language-server", &["--stdio"]),
        );
        servers.insert(
            Language::JavaScript,
            ServerCommand::new("typescript-language-server", &["--stdio"]),
        );
        servers.insert(Language::Go, ServerCommand::new("gopls", &[]));
        servers.insert(Language::C, ServerCommand::new("clangd", &[]));
        servers.insert(Language::Cpp, ServerCommand::new("clangd", &[]));
        servers.insert(Language::Java, ServerCommand::new("jdtls", &[]));
        Self {
            servers,
            timeouts: Timeouts::default(),
        }
    }
}

impl ServerRegistry {
    /// Looks up the server command for a language.
    pub fn command_for(&self, language: Language) -> Option<&ServerCommand> {
        self.servers.get(&language)
    }

    /// Replaces the command for one language.
    pub fn set(&mut self, language: Language, command: ServerCommand) {
        self.servers.insert(language, command);
    }

    /// Applies a CLI override of the form `LANG=CMD[,ARG...]`.
    pub fn apply_override(&mut self, spec: &str) -> Result<()> {
        let (lang, rest) = spec
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected LANG=CMD, got '{spec}'")))?;
        let language = Language::from_name(lang.trim())
            .ok_or_else(|| Error::Config(format!("unknown language '{lang}'")))?;
        let mut parts = rest.split(',').map(str::trim).filter(|s| !s.is_empty());
        let command = parts
            .next()
            .ok_or_else(|| Error::Config(format!("missing command in '{spec}'")))?
            .to_string();
        let args = parts.map(str::to_string).collect();
        self.set(language, ServerCommand { command, args });
        Ok(())
    }

    /// True when some server is configured for the file's language.
    pub fn supports(&self, path: &Path) -> bool {
        Language::from_path(path)
            .map(|l| self.servers.contains_key(&l))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_from_path() {
        assert_eq!(
            Language::from_path(Path::new("src/main.rs")),
            Some(Language::Rust)
        );
        assert_eq!(
            Language::from_path(Path::new("a/b/util.py")),
            Some(Language::Python)
        );
        assert_eq!(Language::from_path(Path::new("README.md")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_default_registry_commands() {
        let registry = ServerRegistry::default();
        assert_eq!(
            registry.command_for(Language::Rust).unwrap().command,
            "rust-analyzer"
        );
        assert_eq!(
            registry.command_for(Language::TypeScript).unwrap().args,
            vec!["--stdio"]
        );
    }

    #[test]
    fn test_apply_override() {
        let mut registry = ServerRegistry::default();
        registry
            .apply_override("python=pyright-langserver,--stdio")
            .unwrap();
        let cmd = registry.command_for(Language::Python).unwrap();
        assert_eq!(cmd.command, "pyright-langserver");
        assert_eq!(cmd.args, vec!["--stdio"]);

        assert!(registry.apply_override("klingon=klsp").is_err());
        assert!(registry.apply_override("nonsense").is_err());
    }

    #[test]
    fn test_supports() {
        let registry = ServerRegistry::default();
        assert!(registry.supports(&PathBuf::from("lib.rs")));
        assert!(!registry.supports(&PathBuf::from("notes.txt")));
    }
}
