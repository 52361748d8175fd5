//! Node lifecycle orchestration over a [`NodeStore`].
//!
//! ```text
//! UNREGISTERED --register--> REGISTERED --tick--> REGISTERED
//!       ^                         |
//!       +-- unregister / lazy expiry / deferred re-check
//! ```
//!
//! Lazy expiry at resolution is authoritative. Every register and tick also
//! arms a one-shot re-check after the heartbeat timeout; re-checks are advisory
//! and are dropped on [`NodeRegistry::shutdown`].

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use statefull_common::{Node, Result, StatefullError};

use super::clock::{Clock, SystemClock};
use super::store::NodeStore;

/// How a caller identifies a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeLookup {
    Id(u64),
    Url(String),
}

impl NodeLookup {
    /// Build a lookup from raw header values. A non-empty id wins over the url.
    pub fn from_headers(id: Option<&str>, url: Option<&str>) -> Result<Self> {
        match (id.filter(|s| !s.is_empty()), url.filter(|s| !s.is_empty())) {
            (Some(raw), _) => raw
                .trim()
                .parse::<u64>()
                .map(Self::Id)
                .map_err(|_| StatefullError::InvalidInput(format!("node id '{raw}' is not numeric"))),
            (None, Some(url)) => Ok(Self::Url(url.to_string())),
            (None, None) => Err(StatefullError::InvalidInput(
                "neither node id nor node url provided".into(),
            )),
        }
    }
}

impl std::fmt::Display for NodeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id '{}'", id),
            Self::Url(url) => write!(f, "url '{}'", url),
        }
    }
}

/// Notified when a node is evicted for missing its heartbeat
#[async_trait]
pub trait NodeTimeoutHook: Send + Sync {
    async fn on_node_timeout(&self, node: &Node);
}

/// Registry of backend nodes with heartbeat expiry
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
    clock: Arc<dyn Clock>,
    heartbeat_timeout: Duration,
    on_timeout: Option<Arc<dyn NodeTimeoutHook>>,
    /// Cancels pending re-checks
    shutdown: broadcast::Sender<()>,
    closed: Arc<AtomicBool>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn NodeStore>, heartbeat_timeout: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            store,
            clock: Arc::new(SystemClock),
            heartbeat_timeout,
            on_timeout: None,
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout_hook(mut self, hook: Arc<dyn NodeTimeoutHook>) -> Self {
        self.on_timeout = Some(hook);
        self
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// True if the node has been silent longer than the heartbeat timeout
    pub fn is_expired(&self, node: &Node) -> bool {
        node.is_expired(self.clock.now_millis(), self.timeout_ms())
    }

    /// Create a new node record; never deduplicates by url
    pub async fn register(&self, url: &str) -> Result<Node> {
        let node = self.store.register_node(url).await?;
        tracing::debug!(node_id = node.id, url = %node.url, "Node registered");
        self.arm_recheck(node.id);
        Ok(node)
    }

    /// Fetch a node, evicting it if its heartbeat is stale
    pub async fn resolve(&self, lookup: &NodeLookup) -> Result<Node> {
        let node = match lookup {
            NodeLookup::Id(id) => self.store.get_node_by_id(*id).await?,
            NodeLookup::Url(url) => self.store.get_node_by_url(url).await?,
        };

        let Some(node) = node else {
            return Err(StatefullError::NodeNotFound(format!("no node with {lookup}")));
        };

        if self.is_expired(&node) {
            self.expire(&node, "lazy").await?;
            return Err(StatefullError::NodeExpired(format!(
                "node {} missed its heartbeat",
                node.id
            )));
        }

        Ok(node)
    }

    /// Refresh a node's heartbeat and arm a re-check
    pub async fn heartbeat(&self, id: u64) -> Result<Option<Node>> {
        let node = self.store.tick_node(id).await?;
        if let Some(ref node) = node {
            tracing::debug!(node_id = node.id, heartbeat = node.heartbeat, "Node ticked");
            self.arm_recheck(node.id);
        }
        Ok(node)
    }

    /// Remove a node; `None` if it was already gone
    pub async fn unregister(&self, id: u64) -> Result<Option<Node>> {
        let node = self.store.unregister_node(id).await?;
        match node {
            Some(ref node) => tracing::info!(node_id = node.id, url = %node.url, "Node unregistered"),
            None => tracing::debug!(node_id = id, "Unregister of absent node"),
        }
        Ok(node)
    }

    /// Every stored node, stale or not
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.store.get_nodes().await
    }

    pub async fn node_ids(&self) -> Result<Vec<u64>> {
        self.store.get_node_ids().await
    }

    /// Cancel pending re-checks and stop arming new ones
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    fn timeout_ms(&self) -> u64 {
        self.heartbeat_timeout.as_millis() as u64
    }

    /// Unregister a stale node. Only the caller that actually removed it fires the hook.
    async fn expire(&self, node: &Node, path: &'static str) -> Result<()> {
        let Some(removed) = self.store.unregister_node(node.id).await? else {
            return Ok(());
        };

        tracing::warn!(
            node_id = removed.id,
            url = %removed.url,
            heartbeat = removed.heartbeat,
            path,
            "Node expired"
        );

        if let Some(hook) = &self.on_timeout {
            hook.on_node_timeout(&removed).await;
        }
        Ok(())
    }

    async fn recheck(&self, id: u64) {
        let node = match self.store.get_node_by_id(id).await {
            Ok(Some(node)) => node,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(node_id = id, error = %e, "Heartbeat re-check lookup failed");
                return;
            }
        };

        if self.is_expired(&node) {
            if let Err(e) = self.expire(&node, "recheck").await {
                tracing::warn!(node_id = id, error = %e, "Heartbeat re-check eviction failed");
            }
        }
    }

    fn arm_recheck(&self, id: u64) {
        // Subscribe before checking `closed` so a concurrent shutdown is never missed
        let mut shutdown = self.shutdown.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(node_id = id, "No runtime, skipping heartbeat re-check");
            return;
        };

        let registry = self.clone();
        let delay = self.heartbeat_timeout;

        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => registry.recheck(id).await,
                _ = shutdown.recv() => {
                    tracing::trace!(node_id = id, "Heartbeat re-check cancelled");
                }
            }
        });
    }
}
