//! MCP (Model Context Protocol) glue.
//!
//! A thin layer over the tool dispatcher: the rmcp server advertises each
//! tool with its schemars-generated input schema and forwards invocations
//! into [`crate::tools::ToolDispatcher`], which owns timeouts and error
//! envelopes. Communication with the client runs over stdio.

pub mod server;

pub use server::KadabraSigils;
