//! Language server orchestration.
//!
//! The layering, bottom up:
//! - [`transport`]: Content-Length-framed JSON-RPC over a subprocess's
//!   stdio, with request/response correlation by id.
//! - [`client`]: one server's lifecycle, handshake, and per-file version
//!   bookkeeping.
//! - [`manager`]: the per-project fleet, one lazily-started server per
//!   language.
//! - [`types`]: position, URI and symbol-kind conversions shared by the
//!   stack.

pub mod client;
pub mod manager;
pub mod transport;
pub mod types;

use crate::error::LspError;

/// Result type for LSP operations.
pub type LspResult<T> = std::result::Result<T, LspError>;

pub use client::{LanguageServer, ServerState};
pub use manager::LanguageServerManager;
pub use transport::Transport;
