//! Temporary strategy: a fresh client per operation, closed on release.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::stats::{ConnectionStatistics, StatsRecorder};
use super::{open_client, Connection, ConnectionStrategy};
use crate::config::{ServerConfig, StrategyMode};
use crate::error::{MusterError, Result};
use crate::mcp::upstream::{SharedClient, SharedClientFactory};
use crate::util::backoff::RetryConfig;
use crate::util::retry::RetryStrategy;
use crate::util::timeout::with_timeout;

/// Tuning for [`TemporaryConnectionStrategy`].
#[derive(Debug, Clone, Default, Builder)]
pub struct TemporaryStrategyOptions {
    /// Retry each connect under this policy.
    pub retry: Option<RetryConfig>,
    /// Bound on the operation run by [`TemporaryConnectionStrategy::with_connection`].
    pub operation_timeout: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TemporaryConnectionStrategy {
    factory: SharedClientFactory,
    options: TemporaryStrategyOptions,
    configs: Mutex<Option<HashMap<String, ServerConfig>>>,
    leases: Mutex<HashMap<Uuid, SharedClient>>,
    shutdown: Mutex<CancellationToken>,
    stats: StatsRecorder,
}

impl TemporaryConnectionStrategy {
    pub fn new(factory: SharedClientFactory, options: TemporaryStrategyOptions) -> Self {
        Self {
            factory,
            options,
            configs: Mutex::new(None),
            leases: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            stats: StatsRecorder::default(),
        }
    }

    pub fn options(&self) -> &TemporaryStrategyOptions {
        &self.options
    }

    fn lookup(&self, server_name: &str) -> Result<ServerConfig> {
        let configs = lock(&self.configs);
        let configs = configs
            .as_ref()
            .ok_or_else(|| MusterError::NotInitialized("temporary connection strategy".into()))?;
        configs
            .get(server_name)
            .cloned()
            .ok_or_else(|| MusterError::UnknownServer(server_name.to_string()))
    }

    async fn connect_once(&self, server_name: &str, config: &ServerConfig) -> Result<SharedClient> {
        match open_client(self.factory.as_ref(), server_name, config).await {
            Ok(client) => Ok(client),
            Err(error) => {
                self.stats.connection_failed();
                tracing::warn!(server = server_name, error = %error, "temporary connect failed");
                Err(error)
            }
        }
    }

    /// Like [`ConnectionStrategy::get_connection`], also abandoning the connect when `cancel` fires.
    ///
    /// Strategy shutdown always cancels in-flight connects.
    pub async fn get_connection_with_cancel(
        &self,
        server_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Connection> {
        let config = self.lookup(server_name)?;
        let shutdown = lock(&self.shutdown).clone();
        self.stats.operation_started();
        let started = Instant::now();

        let connect = async {
            match self.options.retry.clone() {
                Some(retry) => {
                    RetryStrategy::new(retry)?
                        .for_server(server_name)
                        .execute(|| self.connect_once(server_name, &config))
                        .await
                }
                None => self.connect_once(server_name, &config).await,
            }
        };
        let caller_cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        // A cancelled arm drops `connect`; `open_client` disconnects the half-open client.
        let client = tokio::select! {
            _ = shutdown.cancelled() => {
                return Err(MusterError::Cancelled(format!(
                    "connect to '{server_name}' aborted by shutdown"
                )));
            }
            _ = caller_cancelled => {
                return Err(MusterError::Cancelled(format!(
                    "connect to '{server_name}' cancelled by caller"
                )));
            }
            result = connect => result?,
        };

        self.stats.connection_opened(started.elapsed());
        let connection = Connection::new(server_name, Arc::clone(&client));
        lock(&self.leases).insert(connection.id(), client);
        tracing::debug!(server = server_name, lease = %connection.id(), "temporary connection opened");
        Ok(connection)
    }

    /// Acquire a connection, run `operation`, and release it on every exit path.
    pub async fn with_connection<F, Fut, T>(&self, server_name: &str, operation: F) -> Result<T>
    where
        F: FnOnce(SharedClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = self.get_connection(server_name).await?;
        let client = Arc::clone(connection.client());
        let outcome = match self.options.operation_timeout {
            Some(limit) => with_timeout(limit, operation(client)).await,
            None => operation(client).await,
        };
        if let Err(error) = self.release_connection(server_name, Some(connection)).await {
            tracing::warn!(server = server_name, error = %error, "release after operation failed");
        }
        outcome
    }

    /// Number of leases not yet released.
    pub fn outstanding_leases(&self) -> usize {
        lock(&self.leases).len()
    }
}

#[async_trait]
impl ConnectionStrategy for TemporaryConnectionStrategy {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Temporary
    }

    async fn initialize(&self, server_configs: HashMap<String, ServerConfig>) -> Result<()> {
        tracing::debug!(servers = server_configs.len(), "temporary strategy initialized");
        *lock(&self.configs) = Some(server_configs);
        let mut shutdown = lock(&self.shutdown);
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
        Ok(())
    }

    async fn get_connection(&self, server_name: &str) -> Result<Connection> {
        self.get_connection_with_cancel(server_name, None).await
    }

    async fn release_connection(
        &self,
        server_name: &str,
        connection: Option<Connection>,
    ) -> Result<()> {
        let Some(connection) = connection else {
            return Ok(());
        };
        if lock(&self.leases).remove(&connection.id()).is_some() {
            self.stats.connection_closed();
        }
        if let Err(error) = connection.client().disconnect().await {
            tracing::warn!(server = server_name, error = %error, "temporary disconnect failed");
        }
        Ok(())
    }

    async fn statistics(&self) -> ConnectionStatistics {
        self.stats.snapshot()
    }

    async fn shutdown(&self) -> Result<()> {
        lock(&self.shutdown).cancel();
        *lock(&self.configs) = None;
        let leases: Vec<SharedClient> = lock(&self.leases).drain().map(|(_, c)| c).collect();
        for client in leases {
            if let Err(error) = client.disconnect().await {
                tracing::warn!(error = %error, "disconnect during shutdown failed");
            }
        }
        self.stats.reset();
        Ok(())
    }
}

/// Run `operation` against a one-off connection to `server_name`.
///
/// A single-server temporary strategy is built for the call and torn down
/// afterwards, whether the operation succeeds, fails or times out.
pub async fn with_temporary_connection<F, Fut, T>(
    factory: SharedClientFactory,
    server_name: &str,
    config: ServerConfig,
    options: TemporaryStrategyOptions,
    operation: F,
) -> Result<T>
where
    F: FnOnce(SharedClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = TemporaryConnectionStrategy::new(factory, options);
    strategy
        .initialize(HashMap::from([(server_name.to_string(), config)]))
        .await?;
    let outcome = strategy.with_connection(server_name, operation).await;
    if let Err(error) = strategy.shutdown().await {
        tracing::warn!(server = server_name, error = %error, "one-shot strategy shutdown failed");
    }
    outcome
}
