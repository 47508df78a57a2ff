//! Stdio tool-server client
//!
//! `protocol` holds the wire types, `transport` the process and framing,
//! `catalog` the discovered tools, `adapter` the bridge into [`crate::tool`].

pub mod adapter;
pub mod catalog;
pub mod protocol;
pub mod transport;

pub use adapter::McpToolAdapter;
pub use catalog::{categorize, group_by_category, ToolCatalogEntry, ToolCategory, CATEGORY_RULES};
pub use transport::{McpServerConfig, RpcTransport};
