//! Persistent strategy: long-lived clients owned by a pool manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use super::stats::{ConnectionStatistics, StatsRecorder};
use super::{Connection, ConnectionStrategy};
use crate::config::{ServerConfig, StrategyMode};
use crate::error::{MusterError, Result};
use crate::mcp::upstream::SharedClient;
use crate::util::backoff::RetryConfig;

/// Extra settings passed to a pool on initialization.
#[derive(Debug, Clone, Default)]
pub struct PoolContext {
    /// Retry policy for establishing pooled connections.
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetClientOptions {
    /// Replace a pooled client that fails its health check.
    pub require_healthy: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatistics {
    pub total_connections: u64,
    pub active_connections: u64,
}

/// Owns the lifecycle of pooled upstream clients.
#[async_trait]
pub trait ConnectionPoolManager: Send + Sync {
    async fn initialize(
        &self,
        server_configs: HashMap<String, ServerConfig>,
        context: Option<PoolContext>,
    ) -> Result<()>;

    async fn get_client(&self, server_name: &str, options: GetClientOptions)
        -> Result<SharedClient>;

    async fn statistics(&self) -> PoolStatistics;

    async fn shutdown(&self) -> Result<()>;
}

pub struct PersistentConnectionStrategy {
    pool: Arc<dyn ConnectionPoolManager>,
    context: Option<PoolContext>,
    initialized: AtomicBool,
    stats: StatsRecorder,
}

impl PersistentConnectionStrategy {
    pub fn new(pool: Arc<dyn ConnectionPoolManager>, context: Option<PoolContext>) -> Self {
        Self {
            pool,
            context,
            initialized: AtomicBool::new(false),
            stats: StatsRecorder::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionStrategy for PersistentConnectionStrategy {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Persistent
    }

    async fn initialize(&self, server_configs: HashMap<String, ServerConfig>) -> Result<()> {
        if self.is_initialized() {
            tracing::debug!("persistent strategy already initialized");
            return Ok(());
        }
        self.pool
            .initialize(server_configs, self.context.clone())
            .await?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_connection(&self, server_name: &str) -> Result<Connection> {
        if !self.is_initialized() {
            return Err(MusterError::NotInitialized(
                "persistent connection strategy".into(),
            ));
        }
        self.stats.operation_started();
        let started = Instant::now();
        match self
            .pool
            .get_client(
                server_name,
                GetClientOptions {
                    require_healthy: true,
                },
            )
            .await
        {
            Ok(client) => {
                self.stats.connection_timed(started.elapsed());
                Ok(Connection::new(server_name, client))
            }
            Err(error) => {
                self.stats.connection_failed();
                tracing::warn!(server = server_name, error = %error, "pooled connection failed");
                Err(error)
            }
        }
    }

    async fn release_connection(
        &self,
        server_name: &str,
        _connection: Option<Connection>,
    ) -> Result<()> {
        tracing::trace!(server = server_name, "release is a no-op for pooled connections");
        Ok(())
    }

    async fn statistics(&self) -> ConnectionStatistics {
        let pool = self.pool.statistics().await;
        ConnectionStatistics {
            total_connections: pool.total_connections,
            active_connections: pool.active_connections,
            ..self.stats.snapshot()
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.stats.reset();
        self.pool.shutdown().await
    }
}
