//! Upstream MCP clients and the aggregator built on top of them.

pub mod aggregate;
#[cfg(feature = "mcp")]
pub mod client;
#[cfg(feature = "mcp")]
pub mod transport;
pub mod upstream;

pub use aggregate::{AggregatorStatistics, DiscoveryReport, McpAggregator, StartReport};
#[cfg(feature = "mcp")]
pub use client::{mcp_client_factory, MCPClient};
pub use upstream::{ClientFactory, SharedClient, SharedClientFactory, UpstreamClient};
