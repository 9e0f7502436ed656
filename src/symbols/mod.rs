//! The symbol model, its persistent cache, and high-level queries.

pub mod cache;
pub mod model;
pub mod retriever;

pub use cache::SymbolCache;
pub use model::{FindOptions, NamePath, SymbolId, SymbolNode, SymbolTree};
pub use retriever::{ResolvedSymbol, SymbolRetriever};
