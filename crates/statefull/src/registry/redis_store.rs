//! Redis-backed node store.
//!
//! Layout:
//! - `statefull:node_id` - id counter (`INCR`)
//! - `statefull:node:{id}` - node JSON
//! - `statefull:nodes` - set of live ids
//! - `statefull:node_url:{url}` - newest id registered for a url
//!
//! Tick and unregister are read-modify-write and run as Lua scripts so
//! concurrent routers never move a heartbeat backwards or remove a node twice.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use statefull_common::constants::redis_keys::{
    NODE_ID_COUNTER, NODE_PREFIX, NODE_SET, NODE_URL_PREFIX,
};
use statefull_common::{Node, Result, StatefullError};

use super::clock::{Clock, SystemClock};
use super::store::NodeStore;

fn node_key(id: u64) -> String {
    format!("{}{}", NODE_PREFIX, id)
}

fn url_key(url: &str) -> String {
    format!("{}{}", NODE_URL_PREFIX, url)
}

/// KEYS[1] node key; ARGV[1] now. Returns the updated record or nil.
const TICK_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local node = cjson.decode(raw)
local now = tonumber(ARGV[1])
if now > node.heartbeat then
  node.heartbeat = now
  raw = cjson.encode(node)
  redis.call('SET', KEYS[1], raw)
end
return raw
"#;

/// KEYS[1] node key, KEYS[2] id set; ARGV[1] id, ARGV[2] url index prefix.
/// Returns the removed record or nil.
const UNREGISTER_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
local node = cjson.decode(raw)
local url_key = ARGV[2] .. node.url
if redis.call('GET', url_key) == ARGV[1] then
  redis.call('DEL', url_key)
end
return raw
"#;

fn store_err(err: redis::RedisError) -> StatefullError {
    StatefullError::Store(err.to_string())
}

/// Node store shared by every router instance pointing at the same Redis
pub struct RedisNodeStore {
    /// Redis connection manager (auto-reconnecting)
    redis: ConnectionManager,
    clock: Arc<dyn Clock>,
    tick: Script,
    unregister: Script,
}

impl RedisNodeStore {
    /// Connect to Redis with the wall clock
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StatefullError::Config(format!("invalid Redis URL: {e}")))?;
        let redis = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self::new(redis, Arc::new(SystemClock)))
    }

    pub fn new(redis: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            redis,
            clock,
            tick: Script::new(TICK_SCRIPT),
            unregister: Script::new(UNREGISTER_SCRIPT),
        }
    }

    async fn scan_by_url(&self, url: &str) -> Result<Option<Node>> {
        let nodes = self.get_nodes().await?;
        Ok(nodes.into_iter().rev().find(|n| n.url == url))
    }
}

#[async_trait]
impl NodeStore for RedisNodeStore {
    async fn register_node(&self, url: &str) -> Result<Node> {
        let mut conn = self.redis.clone();
        let id: u64 = conn.incr(NODE_ID_COUNTER, 1).await.map_err(store_err)?;

        let node = Node::new(id, url, self.clock.now_millis());
        let data = serde_json::to_string(&node)?;

        let _: () = redis::pipe()
            .atomic()
            .set(node_key(id), data)
            .ignore()
            .sadd(NODE_SET, id)
            .ignore()
            .set(url_key(url), id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok(node)
    }

    async fn unregister_node(&self, id: u64) -> Result<Option<Node>> {
        let mut conn = self.redis.clone();
        let removed: Option<String> = self
            .unregister
            .key(node_key(id))
            .key(NODE_SET)
            .arg(id)
            .arg(NODE_URL_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        match removed {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn tick_node(&self, id: u64) -> Result<Option<Node>> {
        let mut conn = self.redis.clone();
        let ticked: Option<String> = self
            .tick
            .key(node_key(id))
            .arg(self.clock.now_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        match ticked {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn get_node_by_id(&self, id: u64) -> Result<Option<Node>> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(node_key(id)).await.map_err(store_err)?;

        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    async fn get_node_by_url(&self, url: &str) -> Result<Option<Node>> {
        let mut conn = self.redis.clone();
        let indexed: Option<u64> = conn.get(url_key(url)).await.map_err(store_err)?;

        if let Some(id) = indexed {
            if let Some(node) = self.get_node_by_id(id).await? {
                return Ok(Some(node));
            }
        }

        // Index points at a removed node; an older registration may remain
        self.scan_by_url(url).await
    }

    async fn get_nodes(&self) -> Result<Vec<Node>> {
        let ids = self.get_node_ids().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let keys: Vec<String> = ids.iter().map(|id| node_key(*id)).collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        records
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str(&data).map_err(StatefullError::from))
            .collect()
    }

    async fn get_node_ids(&self) -> Result<Vec<u64>> {
        let mut conn = self.redis.clone();
        let mut ids: Vec<u64> = conn.smembers(NODE_SET).await.map_err(store_err)?;
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ManualClock;

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_redis_lifecycle() {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| statefull_common::constants::DEFAULT_REDIS_URL.to_string());
        let store = RedisNodeStore::connect(&url).await.unwrap();

        let node = store.register_node("http://redis-test").await.unwrap();
        let found = store.get_node_by_url("http://redis-test").await.unwrap().unwrap();
        assert_eq!(found.id, node.id);

        let ticked = store.tick_node(node.id).await.unwrap().unwrap();
        assert!(ticked.heartbeat >= node.heartbeat);

        assert!(store.unregister_node(node.id).await.unwrap().is_some());
        assert!(store.unregister_node(node.id).await.unwrap().is_none());
        assert!(store.tick_node(node.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_redis_tick_never_moves_backwards() {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| statefull_common::constants::DEFAULT_REDIS_URL.to_string());
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();

        // Two routers sharing one Redis, the second with a lagging clock
        let ahead = RedisNodeStore::new(conn.clone(), Arc::new(ManualClock::new(1_760_000_009_000)));
        let behind = RedisNodeStore::new(conn, Arc::new(ManualClock::new(1_760_000_001_000)));

        let node = ahead.register_node("http://redis-tick").await.unwrap();
        let ticked = behind.tick_node(node.id).await.unwrap().unwrap();
        assert_eq!(ticked.heartbeat, 1_760_000_009_000);
        assert_eq!(ticked.id, node.id);
        assert_eq!(ticked.url, "http://redis-tick");

        let stored = behind.get_node_by_id(node.id).await.unwrap().unwrap();
        assert_eq!(stored.heartbeat, 1_760_000_009_000);

        let removed = behind.unregister_node(node.id).await.unwrap().unwrap();
        assert_eq!(removed.id, node.id);
        assert!(ahead.get_node_by_url("http://redis-tick").await.unwrap().is_none());
    }
}
