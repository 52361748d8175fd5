//! Shared constants for Statefull components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default router HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8890";

/// Silence interval after which a node is evicted (20 seconds)
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 20_000;

/// Random salt size before base64 encoding
pub const SALT_BYTES: usize = 32;

/// Key derivation parameters for general-purpose hashing
pub mod hash {
    pub const DEFAULT_ITERATIONS: u32 = 512;
    pub const DEFAULT_KEY_LENGTH: usize = 32;
    pub const DEFAULT_ALGORITHM: &str = "sha512";

    /// Stronger parameters used for node proofs
    pub const NODE_ITERATIONS: u32 = 1000;
    pub const NODE_KEY_LENGTH: usize = 128;
}

/// Session token signing defaults
pub mod session {
    pub const DEFAULT_ALGORITHM: &str = "HS512";
    pub const DEFAULT_HEADER: &str = "Authorization";
    pub const DEFAULT_PREFIX: &str = "Bearer ";
}

/// Redis key prefixes
pub mod redis_keys {
    /// Node record: statefull:node:{id}
    pub const NODE_PREFIX: &str = "statefull:node:";

    /// Monotonic node id counter
    pub const NODE_ID_COUNTER: &str = "statefull:node_id";

    /// Set of registered node ids
    pub const NODE_SET: &str = "statefull:nodes";

    /// Url index: statefull:node_url:{url} -> newest id
    pub const NODE_URL_PREFIX: &str = "statefull:node_url:";
}

/// HTTP header names used by nodes
pub mod headers {
    /// Proof hash header
    pub const NODE_HASH: &str = "Statefull_Node_Secret";

    /// Proof salt header
    pub const NODE_SALT: &str = "Statefull_Node_Salt";

    /// Proof timestamp header (epoch millis)
    pub const NODE_TIME: &str = "Statefull_Node_Time";

    /// Node url header
    pub const NODE_URL: &str = "Statefull_Node_Url";

    /// Node id header
    pub const NODE_ID: &str = "Statefull_Node_Id";
}
