//! Connection strategies: how the aggregator obtains upstream clients.
//!
//! [`PersistentConnectionStrategy`] hands out long-lived clients from a
//! [`ConnectionPoolManager`]; [`TemporaryConnectionStrategy`] opens a fresh
//! client per operation and closes it on release. Both sit behind
//! [`ConnectionStrategy`] and are selected by [`create_connection_strategy`].

pub mod persistent;
pub mod pool;
pub mod stats;
pub mod temporary;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{ServerConfig, StrategyMode};
use crate::error::Result;
use crate::mcp::upstream::{ClientFactory, SharedClient, SharedClientFactory};
use crate::util::timeout::with_connect_timeout;

pub use persistent::{
    ConnectionPoolManager, GetClientOptions, PersistentConnectionStrategy, PoolContext,
    PoolStatistics,
};
pub use pool::ClientPool;
pub use stats::ConnectionStatistics;
pub use temporary::{
    with_temporary_connection, TemporaryConnectionStrategy, TemporaryStrategyOptions,
};

/// A leased upstream client.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    server_name: String,
    client: SharedClient,
}

impl Connection {
    pub fn new(server_name: impl Into<String>, client: SharedClient) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_name: server_name.into(),
            client,
        }
    }

    /// Unique id of this lease.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server_name", &self.server_name)
            .field("connected", &self.client.is_connected())
            .finish()
    }
}

/// Uniform interface over the persistent and temporary strategies.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn mode(&self) -> StrategyMode;

    /// Register the servers this strategy may connect to.
    async fn initialize(&self, server_configs: HashMap<String, ServerConfig>) -> Result<()>;

    /// Obtain a connection to `server_name`.
    async fn get_connection(&self, server_name: &str) -> Result<Connection>;

    /// Hand a connection back. `None` is accepted and ignored.
    async fn release_connection(
        &self,
        server_name: &str,
        connection: Option<Connection>,
    ) -> Result<()>;

    async fn statistics(&self) -> ConnectionStatistics;

    /// Release everything. `get_connection` fails until re-initialized.
    async fn shutdown(&self) -> Result<()>;
}

/// Shared handle to a connection strategy.
pub type SharedStrategy = Arc<dyn ConnectionStrategy>;

/// Collaborators needed to build a strategy.
#[derive(Clone)]
pub struct StrategyDependencies {
    pub client_factory: SharedClientFactory,
    /// Persistent mode only. Defaults to a [`ClientPool`] over `client_factory`.
    pub pool_manager: Option<Arc<dyn ConnectionPoolManager>>,
    pub pool_context: Option<PoolContext>,
    pub temporary: TemporaryStrategyOptions,
}

impl StrategyDependencies {
    pub fn new(client_factory: SharedClientFactory) -> Self {
        Self {
            client_factory,
            pool_manager: None,
            pool_context: None,
            temporary: TemporaryStrategyOptions::default(),
        }
    }

    pub fn with_pool_manager(mut self, pool_manager: Arc<dyn ConnectionPoolManager>) -> Self {
        self.pool_manager = Some(pool_manager);
        self
    }

    pub fn with_pool_context(mut self, context: PoolContext) -> Self {
        self.pool_context = Some(context);
        self
    }

    pub fn with_temporary_options(mut self, options: TemporaryStrategyOptions) -> Self {
        self.temporary = options;
        self
    }
}

/// Build the strategy for `mode`.
pub fn create_connection_strategy(
    mode: StrategyMode,
    dependencies: StrategyDependencies,
) -> SharedStrategy {
    tracing::debug!(%mode, "creating connection strategy");
    match mode {
        StrategyMode::Persistent => {
            let pool = dependencies.pool_manager.unwrap_or_else(|| {
                Arc::new(ClientPool::new(Arc::clone(&dependencies.client_factory)))
            });
            Arc::new(PersistentConnectionStrategy::new(
                pool,
                dependencies.pool_context,
            ))
        }
        StrategyMode::Temporary => Arc::new(TemporaryConnectionStrategy::new(
            dependencies.client_factory,
            dependencies.temporary,
        )),
    }
}

/// Create a client and connect it, bounded by the server's timeout.
///
/// A client that fails or times out is disconnected before the error is returned.
/// If the returned future is dropped mid-connect (shutdown, caller cancellation,
/// an outer timeout) the half-open client is disconnected on a spawned task.
pub(crate) async fn open_client(
    factory: &dyn ClientFactory,
    server_name: &str,
    config: &ServerConfig,
) -> Result<SharedClient> {
    let client = factory.create(server_name);
    let guard = AbandonedConnect::new(server_name, Arc::clone(&client));
    let outcome = with_connect_timeout(
        server_name,
        config.timeout_duration(),
        client.connect(config, server_name),
    )
    .await;
    guard.disarm();

    match outcome {
        Ok(()) => Ok(client),
        Err(error) => {
            if let Err(cleanup) = client.disconnect().await {
                tracing::debug!(server = server_name, error = %cleanup, "cleanup after failed connect");
            }
            Err(error)
        }
    }
}

/// Disconnects a client whose connect future was dropped before it settled.
struct AbandonedConnect {
    server_name: String,
    client: Option<SharedClient>,
}

impl AbandonedConnect {
    fn new(server_name: &str, client: SharedClient) -> Self {
        Self {
            server_name: server_name.to_string(),
            client: Some(client),
        }
    }

    fn disarm(mut self) {
        self.client = None;
    }
}

impl Drop for AbandonedConnect {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let server = std::mem::take(&mut self.server_name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = client.disconnect().await {
                        tracing::debug!(server = %server, error = %error, "cleanup after abandoned connect");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(server = %server, "connect abandoned outside a runtime, client not disconnected");
            }
        }
    }
}
