//! Keyed pool of MCP clients with idle eviction.
//!
//! The pool stores connection recipes by server id and builds clients
//! lazily on first use. A background reaper disconnects clients that
//! sit unused past the idle limit; the recipe always survives, so the
//! next [`ConnectionPool::get_client`] simply reconnects.
//!
//! Clients are not handed out exclusively: a [`McpClient`] is safe for
//! concurrent callers by virtue of the session's correlation contract.
//!
//! Lock order: pool maps → client → session. Connects happen outside
//! the pool lock, with a re-check on completion so a concurrently
//! inserted healthy client wins over a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ClientError, McpClient, ServerConfig};

/// Default idle limit before a pooled client is evicted.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(300);

/// Age past which a pooled client counts as idle in [`PoolStats`].
const IDLE_STATS_AGE: Duration = Duration::from_secs(60);

/// Errors raised by pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection recipe is registered for this id.
    #[error("unknown server id: {id}")]
    UnknownServer {
        /// The requested id.
        id: String,
    },

    /// Building or connecting a client failed.
    #[error("failed to connect to server `{id}`: {source}")]
    Connect {
        /// The server id.
        id: String,
        /// The underlying client error.
        #[source]
        source: ClientError,
    },
}

/// Pool occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of registered connection recipes.
    pub total_servers: usize,
    /// Number of pooled clients.
    pub active_connections: usize,
    /// Pooled clients unused for longer than one minute.
    pub idle_connections: usize,
}

/// A client together with its last-used instant.
struct PooledClient {
    client: Arc<McpClient>,
    last_used: Instant,
}

struct PoolInner {
    configs: Mutex<HashMap<String, ServerConfig>>,
    clients: Mutex<HashMap<String, PooledClient>>,
}

/// Keyed store of MCP clients with lazy connect and idle eviction.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    max_idle: Duration,
    shutdown: watch::Sender<bool>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Creates a pool with the default idle limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Creates a pool that evicts clients idle for longer than
    /// `max_idle`. The reaper ticks at half that period.
    #[must_use]
    pub fn with_max_idle(max_idle: Duration) -> Self {
        let inner = Arc::new(PoolInner {
            configs: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reaper = tokio::spawn(Self::reap_loop(
            Arc::clone(&inner),
            max_idle,
            shutdown_rx,
        ));

        Self {
            inner,
            max_idle,
            shutdown,
            reaper: std::sync::Mutex::new(Some(reaper)),
        }
    }

    /// Registers a connection recipe. Does not connect.
    pub async fn add_server(&self, id: impl Into<String>, config: ServerConfig) {
        self.inner.configs.lock().await.insert(id.into(), config);
    }

    /// Returns a connected client for `id`, building one on demand.
    ///
    /// A pooled, still-connected client is returned directly with its
    /// last-used instant refreshed. Otherwise a new client is built
    /// from the stored recipe and connected outside the pool lock; if a
    /// healthy client appeared concurrently, that one wins and the
    /// fresh connection is discarded.
    ///
    /// # Errors
    ///
    /// Fails when no recipe is stored for `id` or the connect fails.
    pub async fn get_client(&self, id: &str) -> Result<Arc<McpClient>, PoolError> {
        let stale = {
            let mut clients = self.inner.clients.lock().await;
            match clients.get_mut(id) {
                Some(pooled) if pooled.client.is_connected() => {
                    pooled.last_used = Instant::now();
                    return Ok(Arc::clone(&pooled.client));
                }
                Some(_) => clients.remove(id),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(server = %id, "discarding failed pooled client");
            stale.client.disconnect().await;
        }

        let config = self
            .inner
            .configs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PoolError::UnknownServer { id: id.to_string() })?;

        let client = Arc::new(McpClient::new(config));
        client
            .connect()
            .await
            .map_err(|source| PoolError::Connect {
                id: id.to_string(),
                source,
            })?;

        // Re-check: another caller may have connected while we did.
        let loser = {
            let mut clients = self.inner.clients.lock().await;
            if let Some(existing) = clients.get_mut(id) {
                if existing.client.is_connected() {
                    existing.last_used = Instant::now();
                    let winner = Arc::clone(&existing.client);
                    Some((winner, Arc::clone(&client)))
                } else {
                    let previous = clients.insert(
                        id.to_string(),
                        PooledClient {
                            client: Arc::clone(&client),
                            last_used: Instant::now(),
                        },
                    );
                    previous.map(|p| (Arc::clone(&client), p.client))
                }
            } else {
                clients.insert(
                    id.to_string(),
                    PooledClient {
                        client: Arc::clone(&client),
                        last_used: Instant::now(),
                    },
                );
                None
            }
        };

        match loser {
            Some((winner, loser)) => {
                loser.disconnect().await;
                Ok(winner)
            }
            None => Ok(client),
        }
    }

    /// Marks a client as recently used. Advisory; clients are shared,
    /// not checked out.
    pub async fn release_client(&self, id: &str) {
        if let Some(pooled) = self.inner.clients.lock().await.get_mut(id) {
            pooled.last_used = Instant::now();
        }
    }

    /// Deletes a recipe and evicts its client, if any.
    pub async fn remove_server(&self, id: &str) {
        self.inner.configs.lock().await.remove(id);
        let evicted = self.inner.clients.lock().await.remove(id);
        if let Some(evicted) = evicted {
            evicted.client.disconnect().await;
        }
    }

    /// Current occupancy counters.
    pub async fn stats(&self) -> PoolStats {
        let total_servers = self.inner.configs.lock().await.len();
        let clients = self.inner.clients.lock().await;
        let active_connections = clients.len();
        let idle_connections = clients
            .values()
            .filter(|pooled| pooled.last_used.elapsed() > IDLE_STATS_AGE)
            .count();
        PoolStats {
            total_servers,
            active_connections,
            idle_connections,
        }
    }

    /// Stops the reaper and disconnects every pooled client.
    ///
    /// Recipes are retained; the pool can still hand out new clients
    /// afterwards, but without idle eviction.
    pub async fn close_all(&self) {
        let _ = self.shutdown.send(true);
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = reaper {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "pool reaper panicked");
                }
            }
        }

        let drained: Vec<PooledClient> = {
            let mut clients = self.inner.clients.lock().await;
            clients.drain().map(|(_, pooled)| pooled).collect()
        };
        for pooled in drained {
            pooled.client.disconnect().await;
        }
    }

    /// The reaper: evicts clients idle past `max_idle`, every
    /// `max_idle / 2`, until the shutdown flag flips.
    async fn reap_loop(
        inner: Arc<PoolInner>,
        max_idle: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = max_idle / 2;
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Self::reap_idle(&inner, max_idle).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn reap_idle(inner: &PoolInner, max_idle: Duration) {
        let expired: Vec<(String, PooledClient)> = {
            let mut clients = inner.clients.lock().await;
            let ids: Vec<String> = clients
                .iter()
                .filter(|(_, pooled)| pooled.last_used.elapsed() > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| clients.remove(&id).map(|pooled| (id, pooled)))
                .collect()
        };

        for (id, pooled) in expired {
            debug!(server = %id, idle = ?pooled.last_used.elapsed(), "evicting idle MCP client");
            pooled.client.disconnect().await;
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}
