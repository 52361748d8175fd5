//! Persistence contract for node records.

use async_trait::async_trait;
use statefull_common::{Node, Result};

/// Backing store for the node registry.
///
/// Implementations must give read-after-write consistency per node id and
/// treat a second unregister of the same id as a miss (`Ok(None)`), never an
/// error. Ids are assigned by the store and never reused.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Always creates a new record, even for a known url
    async fn register_node(&self, url: &str) -> Result<Node>;

    async fn unregister_node(&self, id: u64) -> Result<Option<Node>>;

    /// Refresh the heartbeat; it must never move backwards
    async fn tick_node(&self, id: u64) -> Result<Option<Node>>;

    async fn get_node_by_id(&self, id: u64) -> Result<Option<Node>>;

    async fn get_node_by_url(&self, url: &str) -> Result<Option<Node>>;

    async fn get_nodes(&self) -> Result<Vec<Node>>;

    async fn get_node_ids(&self) -> Result<Vec<u64>>;
}
