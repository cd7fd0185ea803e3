//! Muster: aggregate many MCP servers behind one namespace.
//!
//! Upstream servers are reached through a [`connection::ConnectionStrategy`]
//! (pooled or per-call), transient failures are absorbed by
//! [`util::retry::RetryStrategy`], and every tool, prompt and resource is
//! indexed under a qualified `server--name` key in [`mapping::ResourceMaps`].
//!
//! # Quick Start
//!
//! ```no_run
//! use muster::prelude::*;
//!
//! # async fn example() -> muster::error::Result<()> {
//! let config = AggregatorConfig::load()?;
//! let aggregator = McpAggregator::with_mcp_clients(config)?;
//! aggregator.start().await?;
//!
//! for tool in aggregator.list_tools().await {
//!     println!("{}", tool.namespaced_name);
//! }
//! let result = aggregator
//!     .call_tool("fs--read_file", serde_json::json!({ "path": "/etc/hosts" }))
//!     .await?;
//! println!("{}", result.into_value_or_text());
//! aggregator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod mapping;
pub mod mcp;
pub mod prelude;
pub mod types;
pub mod util;
