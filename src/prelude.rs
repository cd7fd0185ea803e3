//! Convenience re-exports for common use.

pub use crate::config::{
    AggregatorConfig, ConflictResolution, ConnectionMode, ServerConfig, StrategyMode,
    TransportConfig,
};
pub use crate::connection::{
    create_connection_strategy, with_temporary_connection, Connection, ConnectionStrategy,
    StrategyDependencies, TemporaryStrategyOptions,
};
pub use crate::error::{MusterError, Result};
pub use crate::mapping::{AddOptions, ResourceCategory, ResourceMaps};
pub use crate::mcp::{McpAggregator, SharedClient, UpstreamClient};
pub use crate::types::{PromptDefinition, ResourceDefinition, ToolCallResult, ToolDefinition};
pub use crate::util::backoff::RetryConfig;
pub use crate::util::retry::RetryStrategy;
