//! Node allocation for browser sessions.
//!
//! The choice of node belongs to an [`AllocationPolicy`]; the dispatcher maps
//! its answer onto the router's error taxonomy:
//! - `Err(Failed)` -> 400
//! - `Ok(None)` -> 503, no capacity
//! - `Ok(Some(node))` with a usable url and id -> 200
//! - anything else -> 500, contract violation

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use statefull_common::{Node, StatefullError};

use crate::registry::{NodeLookup, NodeRegistry};
use crate::session::SessionHandle;

/// Session field the sticky policy pins the node id under
pub const PINNED_NODE_FIELD: &str = "node";

/// Everything a policy may look at
pub struct AllocationContext {
    pub session: SessionHandle,
    pub headers: HeaderMap,
    pub registry: NodeRegistry,
}

#[derive(Debug, Error)]
pub enum AllocationError {
    /// The policy could not decide (store down, upstream error, ...)
    #[error("allocation policy failed: {0}")]
    Failed(#[from] anyhow::Error),

    /// The policy produced something outside its contract
    #[error("allocation policy broke its contract: {0}")]
    ContractViolation(String),
}

/// Picks a node for a validated request, or `None` when nothing is available
#[async_trait]
pub trait AllocationPolicy: Send + Sync {
    async fn allocate(&self, ctx: &AllocationContext) -> Result<Option<Node>, AllocationError>;
}

/// Runs the policy and classifies its outcome
pub struct AllocationDispatcher {
    policy: Arc<dyn AllocationPolicy>,
}

impl AllocationDispatcher {
    pub fn new(policy: Arc<dyn AllocationPolicy>) -> Self {
        Self { policy }
    }

    pub async fn dispatch(&self, ctx: &AllocationContext) -> statefull_common::Result<Node> {
        match self.policy.allocate(ctx).await {
            Ok(Some(node)) => {
                check_node(&node)?;
                tracing::debug!(session_id = %ctx.session.id(), node_id = node.id, "Node allocated");
                Ok(node)
            }
            Ok(None) => {
                tracing::debug!(session_id = %ctx.session.id(), "No node available");
                Err(StatefullError::NoCapacity)
            }
            Err(AllocationError::Failed(e)) => {
                tracing::error!(session_id = %ctx.session.id(), error = ?e, "Allocation policy failed");
                Err(StatefullError::AllocationFailed(e.to_string()))
            }
            Err(AllocationError::ContractViolation(msg)) => {
                tracing::error!(session_id = %ctx.session.id(), %msg, "Allocation policy contract violation");
                Err(StatefullError::ContractViolation(msg))
            }
        }
    }
}

fn check_node(node: &Node) -> statefull_common::Result<()> {
    if node.url.trim().is_empty() {
        tracing::error!(node_id = node.id, "Allocation policy returned a node without url");
        return Err(StatefullError::ContractViolation(format!(
            "node {} has an empty url",
            node.id
        )));
    }
    if node.id == 0 {
        tracing::error!(url = %node.url, "Allocation policy returned an unassigned node id");
        return Err(StatefullError::ContractViolation("node id 0 is never assigned".into()));
    }
    Ok(())
}

fn is_gone(err: &StatefullError) -> bool {
    matches!(err, StatefullError::NodeNotFound(_) | StatefullError::NodeExpired(_))
}

/// Cycles through registered nodes, skipping (and evicting) stale ones
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursor: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AllocationPolicy for RoundRobinPolicy {
    async fn allocate(&self, ctx: &AllocationContext) -> Result<Option<Node>, AllocationError> {
        let ids = ctx.registry.node_ids().await.map_err(anyhow::Error::from)?;
        if ids.is_empty() {
            return Ok(None);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..ids.len() {
            let id = ids[(start + offset) % ids.len()];
            match ctx.registry.resolve(&NodeLookup::Id(id)).await {
                Ok(node) => return Ok(Some(node)),
                Err(e) if is_gone(&e) => continue,
                Err(e) => return Err(anyhow::Error::from(e).into()),
            }
        }

        Ok(None)
    }
}

/// Keeps a session on the node it was first given while that node lives
pub struct StickyPolicy<P> {
    inner: P,
}

impl<P: AllocationPolicy> StickyPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: AllocationPolicy> AllocationPolicy for StickyPolicy<P> {
    async fn allocate(&self, ctx: &AllocationContext) -> Result<Option<Node>, AllocationError> {
        let pinned = ctx
            .session
            .read()
            .await
            .get(PINNED_NODE_FIELD)
            .and_then(Value::as_u64);

        if let Some(id) = pinned {
            match ctx.registry.resolve(&NodeLookup::Id(id)).await {
                Ok(node) => return Ok(Some(node)),
                Err(e) if is_gone(&e) => {
                    tracing::debug!(session_id = %ctx.session.id(), node_id = id, "Pinned node gone, reallocating");
                }
                Err(e) => return Err(anyhow::Error::from(e).into()),
            }
        }

        let chosen = self.inner.allocate(ctx).await?;
        let mut session = ctx.session.write().await;
        match &chosen {
            Some(node) => {
                session.insert(PINNED_NODE_FIELD, node.id);
            }
            None => {
                session.extra.remove(PINNED_NODE_FIELD);
            }
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::registry::{ManualClock, MemoryNodeStore};
    use crate::session::SessionCodec;
    use statefull_common::Session;
    use std::time::Duration;

    struct Fixed(Result<Option<Node>, fn() -> AllocationError>);

    #[async_trait]
    impl AllocationPolicy for Fixed {
        async fn allocate(&self, _ctx: &AllocationContext) -> Result<Option<Node>, AllocationError> {
            match &self.0 {
                Ok(node) => Ok(node.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn context(clock: Arc<ManualClock>) -> AllocationContext {
        let codec = Arc::new(SessionCodec::new(&SessionConfig::new("k")).unwrap());
        let store = Arc::new(MemoryNodeStore::with_clock(clock.clone()));
        AllocationContext {
            session: SessionHandle::new(Session::fresh("s1"), codec),
            headers: HeaderMap::new(),
            registry: NodeRegistry::new(store, Duration::from_secs(20)).with_clock(clock),
        }
    }

    async fn dispatch(policy: Fixed) -> statefull_common::Result<Node> {
        let ctx = context(Arc::new(ManualClock::new(0)));
        AllocationDispatcher::new(Arc::new(policy)).dispatch(&ctx).await
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let node = Node::new(1, "http://n1", 0);
        assert_eq!(dispatch(Fixed(Ok(Some(node.clone())))).await.unwrap(), node);

        let err = dispatch(Fixed(Ok(None))).await.unwrap_err();
        assert_eq!(err.status_code(), 503);

        let err = dispatch(Fixed(Err(|| AllocationError::Failed(anyhow::anyhow!("boom")))))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = dispatch(Fixed(Ok(Some(Node::new(1, "  ", 0))))).await.unwrap_err();
        assert!(matches!(err, StatefullError::ContractViolation(_)));

        let err = dispatch(Fixed(Err(|| AllocationError::ContractViolation("bad".into()))))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_round_robin_cycles_and_skips_stale() {
        let clock = Arc::new(ManualClock::new(0));
        let ctx = context(clock.clone());
        let stale = ctx.registry.register("http://stale").await.unwrap();
        clock.advance(15_000);
        let a = ctx.registry.register("http://a").await.unwrap();
        let b = ctx.registry.register("http://b").await.unwrap();
        clock.advance(10_000);

        let policy = RoundRobinPolicy::new();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(policy.allocate(&ctx).await.unwrap().unwrap().id);
        }

        assert!(!seen.contains(&stale.id));
        assert!(seen.contains(&a.id) && seen.contains(&b.id));
        assert!(ctx.registry.node_ids().await.unwrap().len() == 2);
        ctx.registry.shutdown();
    }

    #[tokio::test]
    async fn test_round_robin_empty_pool() {
        let ctx = context(Arc::new(ManualClock::new(0)));
        assert!(RoundRobinPolicy::new().allocate(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sticky_reuses_pinned_node() {
        let clock = Arc::new(ManualClock::new(0));
        let ctx = context(clock.clone());
        ctx.registry.register("http://a").await.unwrap();
        ctx.registry.register("http://b").await.unwrap();

        let policy = StickyPolicy::new(RoundRobinPolicy::new());
        let first = policy.allocate(&ctx).await.unwrap().unwrap();
        for _ in 0..3 {
            assert_eq!(policy.allocate(&ctx).await.unwrap().unwrap(), first);
        }
        assert_eq!(
            ctx.session.read().await.get(PINNED_NODE_FIELD),
            Some(&serde_json::json!(first.id))
        );
        ctx.registry.shutdown();
    }

    #[tokio::test]
    async fn test_sticky_moves_off_dead_node() {
        let clock = Arc::new(ManualClock::new(0));
        let ctx = context(clock.clone());
        let a = ctx.registry.register("http://a").await.unwrap();

        let policy = StickyPolicy::new(RoundRobinPolicy::new());
        assert_eq!(policy.allocate(&ctx).await.unwrap().unwrap().id, a.id);

        ctx.registry.unregister(a.id).await.unwrap();
        let b = ctx.registry.register("http://b").await.unwrap();
        assert_eq!(policy.allocate(&ctx).await.unwrap().unwrap().id, b.id);
        ctx.registry.shutdown();
    }
}
