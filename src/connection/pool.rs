//! Default pool manager: one long-lived client per server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::open_client;
use super::persistent::{ConnectionPoolManager, GetClientOptions, PoolContext, PoolStatistics};
use crate::config::ServerConfig;
use crate::error::{MusterError, Result};
use crate::mcp::upstream::{SharedClient, SharedClientFactory};
use crate::util::backoff::RetryConfig;
use crate::util::retry::RetryStrategy;

struct Slot {
    config: ServerConfig,
    /// Serializes connects to this server.
    client: Mutex<Option<SharedClient>>,
}

#[derive(Default)]
struct PoolState {
    slots: HashMap<String, Arc<Slot>>,
    retry: Option<RetryConfig>,
    cancel: CancellationToken,
}

/// Lazily connects one client per server and reuses it.
pub struct ClientPool {
    factory: SharedClientFactory,
    state: RwLock<PoolState>,
    created: AtomicU64,
    /// Slots currently holding a client. Kept outside the slot locks so
    /// statistics never wait on an in-flight connect.
    live: AtomicU64,
}

impl ClientPool {
    pub fn new(factory: SharedClientFactory) -> Self {
        Self {
            factory,
            state: RwLock::new(PoolState::default()),
            created: AtomicU64::new(0),
            live: AtomicU64::new(0),
        }
    }

    async fn connect(
        &self,
        server_name: &str,
        config: &ServerConfig,
        retry: Option<RetryConfig>,
        cancel: &CancellationToken,
    ) -> Result<SharedClient> {
        let factory = self.factory.as_ref();
        let connect = async {
            match retry {
                Some(retry) => {
                    RetryStrategy::new(retry)?
                        .for_server(server_name)
                        .execute(|| open_client(factory, server_name, config))
                        .await
                }
                None => open_client(factory, server_name, config).await,
            }
        };
        // Dropping `connect` on cancellation disconnects any half-open client.
        tokio::select! {
            _ = cancel.cancelled() => Err(MusterError::Cancelled(format!(
                "pool is shutting down, connect to '{server_name}' abandoned"
            ))),
            result = connect => result,
        }
    }

    async fn close_slot(&self, server_name: &str, slot: &Slot) {
        if let Some(client) = slot.client.lock().await.take() {
            self.live.fetch_sub(1, Ordering::SeqCst);
            if let Err(error) = client.disconnect().await {
                tracing::warn!(server = server_name, error = %error, "failed to disconnect pooled client");
            }
        }
    }
}

#[async_trait]
impl ConnectionPoolManager for ClientPool {
    async fn initialize(
        &self,
        server_configs: HashMap<String, ServerConfig>,
        context: Option<PoolContext>,
    ) -> Result<()> {
        let previous = {
            let mut state = self.state.write().await;
            let previous = std::mem::take(&mut state.slots);
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.retry = context.and_then(|c| c.retry);
            state.slots = server_configs
                .into_iter()
                .map(|(name, config)| {
                    let slot = Slot {
                        config,
                        client: Mutex::new(None),
                    };
                    (name, Arc::new(slot))
                })
                .collect();
            tracing::debug!(servers = state.slots.len(), "client pool initialized");
            previous
        };
        for (name, slot) in previous {
            self.close_slot(&name, &slot).await;
        }
        Ok(())
    }

    async fn get_client(
        &self,
        server_name: &str,
        options: GetClientOptions,
    ) -> Result<SharedClient> {
        let (slot, retry, cancel) = {
            let state = self.state.read().await;
            let slot = state
                .slots
                .get(server_name)
                .cloned()
                .ok_or_else(|| MusterError::UnknownServer(server_name.to_string()))?;
            (slot, state.retry.clone(), state.cancel.clone())
        };

        let mut pooled = slot.client.lock().await;
        if let Some(client) = pooled.as_ref() {
            if !options.require_healthy || client.is_healthy().await {
                return Ok(Arc::clone(client));
            }
            tracing::warn!(server = server_name, "replacing unhealthy pooled client");
            if let Some(stale) = pooled.take() {
                self.live.fetch_sub(1, Ordering::SeqCst);
                if let Err(error) = stale.disconnect().await {
                    tracing::debug!(server = server_name, error = %error, "stale client disconnect failed");
                }
            }
        }

        let client = self
            .connect(server_name, &slot.config, retry, &cancel)
            .await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        *pooled = Some(Arc::clone(&client));
        tracing::debug!(server = server_name, "pooled client connected");
        Ok(client)
    }

    async fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            total_connections: self.created.load(Ordering::SeqCst),
            active_connections: self.live.load(Ordering::SeqCst),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let slots = {
            let mut state = self.state.write().await;
            state.cancel.cancel();
            std::mem::take(&mut state.slots)
        };
        for (name, slot) in slots {
            self.close_slot(&name, &slot).await;
        }
        Ok(())
    }
}
