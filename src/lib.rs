//! Kadabra Sigils MCP Server
//!
//! An MCP (Model Context Protocol) server that gives LLM applications a
//! symbol-level view of a source tree: navigate by name-paths, read file
//! overviews, and apply symbol-scoped edits (replace a body, insert before
//! or after a symbol, rename across files), all backed by off-the-shelf
//! language servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     stdio      ┌──────────────────┐
//! │   LLM Client    │◄──────────────►│    MCP Server    │
//! │  (Claude Code)  │    (MCP)       │ (kadabra-sigils) │
//! └─────────────────┘                └────────┬─────────┘
//!                                             │
//!                                    ┌────────▼─────────┐
//!                                    │  ToolDispatcher  │
//!                                    └────────┬─────────┘
//!                          ┌─────────────────┼──────────────────┐
//!                   ┌──────▼──────┐   ┌──────▼──────┐    ┌──────▼──────┐
//!                   │  Retriever  │   │ EditEngine  │    │ SymbolCache │
//!                   └──────┬──────┘   └──────┬──────┘    └─────────────┘
//!                          └────────┬────────┘
//!                           ┌───────▼────────┐
//!                           │    Manager     │  one server per language
//!                           └───────┬────────┘
//!                           ┌───────▼────────┐
//!                           │ LanguageServer │  lifecycle + file versions
//!                           └───────┬────────┘
//!                           ┌───────▼────────┐
//!                           │   Transport    │  JSON-RPC over stdio
//!                           └────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`agent`] - The active project and everything bound to it
//! - [`config`] - Language registry and timeouts
//! - [`edit`] - Symbol-scoped edits with atomic writes
//! - [`error`] - Error taxonomy for the entire application
//! - [`lsp`] - Transport, per-server session, and the fleet manager
//! - [`mcp`] - MCP glue over the tool dispatcher
//! - [`symbols`] - Symbol trees, name-paths, cache, and queries
//! - [`tools`] - Tool capability trait and dispatcher

// Enforce documentation and other quality attributes
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are too strict
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod agent;
pub mod config;
pub mod edit;
pub mod error;
pub mod lsp;
pub mod mcp;
pub mod symbols;
pub mod tools;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
