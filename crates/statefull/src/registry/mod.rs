//! Node registry.
//!
//! Implements:
//! - Store contract with in-memory and Redis backends
//! - Heartbeat lifecycle with lazy expiry and deferred re-checks

mod clock;
mod lifecycle;
mod memory;
mod redis_store;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::{NodeLookup, NodeRegistry, NodeTimeoutHook};
pub use memory::MemoryNodeStore;
pub use redis_store::RedisNodeStore;
pub use store::NodeStore;
