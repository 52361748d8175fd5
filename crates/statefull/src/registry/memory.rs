//! In-process node store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use statefull_common::{Node, Result};

use super::clock::{Clock, SystemClock};
use super::store::NodeStore;

#[derive(Debug)]
struct MemoryState {
    next_id: u64,
    nodes: BTreeMap<u64, Node>,
}

/// Node store kept in a locked ordered map
pub struct MemoryNodeStore {
    state: RwLock<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_id: 1,
                nodes: BTreeMap::new(),
            }),
            clock,
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn register_node(&self, url: &str) -> Result<Node> {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;

        let node = Node::new(id, url, self.clock.now_millis());
        state.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn unregister_node(&self, id: u64) -> Result<Option<Node>> {
        Ok(self.state.write().await.nodes.remove(&id))
    }

    async fn tick_node(&self, id: u64) -> Result<Option<Node>> {
        let now = self.clock.now_millis();
        let mut state = self.state.write().await;
        Ok(state.nodes.get_mut(&id).map(|node| {
            node.tick(now);
            node.clone()
        }))
    }

    async fn get_node_by_id(&self, id: u64) -> Result<Option<Node>> {
        Ok(self.state.read().await.nodes.get(&id).cloned())
    }

    async fn get_node_by_url(&self, url: &str) -> Result<Option<Node>> {
        // Newest registration wins when a url was registered more than once
        let state = self.state.read().await;
        Ok(state.nodes.values().rev().find(|n| n.url == url).cloned())
    }

    async fn get_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.read().await.nodes.values().cloned().collect())
    }

    async fn get_node_ids(&self) -> Result<Vec<u64>> {
        Ok(self.state.read().await.nodes.keys().copied().collect())
    }
}
