//! Configuration management for the Statefull router.
//!
//! Secrets and the external url are mandatory; everything else has a default.

use anyhow::{Context, Result};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use statefull_common::StatefullError;
use statefull_common::constants::{
    DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, hash, headers, session,
};

/// Which node store backs the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; nodes are lost on restart
    #[default]
    Memory,
    /// Shared Redis, for several routers over one pool
    Redis,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Public url of this router, handed to nodes and browsers
    pub external_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Node store backend
    #[serde(default)]
    pub store: StoreBackend,

    /// Redis connection URL (redis store only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Node authentication and heartbeat settings
    pub node: NodeConfig,

    /// Session token settings
    pub session: SessionConfig,
}

/// Node-facing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Shared secret nodes prove knowledge of
    pub secret: String,

    /// Silence interval before a node is evicted
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_node_iterations")]
    pub hash_iterations: u32,

    #[serde(default = "default_node_key_length")]
    pub hash_key_length: usize,

    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Reject proofs whose timestamp is further than this from now
    #[serde(default)]
    pub time_window_ms: Option<u64>,

    #[serde(default)]
    pub headers: NodeHeaderConfig,
}

/// Header names nodes use
#[derive(Debug, Clone, Deserialize)]
pub struct NodeHeaderConfig {
    #[serde(default = "default_hash_header")]
    pub hash: String,
    #[serde(default = "default_salt_header")]
    pub salt: String,
    #[serde(default = "default_time_header")]
    pub time: String,
    #[serde(default = "default_url_header")]
    pub url: String,
    #[serde(default = "default_id_header")]
    pub id: String,
}

/// Parsed node header names
#[derive(Debug, Clone)]
pub struct NodeHeaderNames {
    pub hash: HeaderName,
    pub salt: HeaderName,
    pub time: HeaderName,
    pub url: HeaderName,
    pub id: HeaderName,
}

/// Session token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Symmetric signing key
    pub secret: String,

    /// HS256, HS384 or HS512
    #[serde(default = "default_session_algorithm")]
    pub algorithm: String,

    #[serde(default = "default_session_header")]
    pub request_header: String,

    #[serde(default = "default_session_prefix")]
    pub request_prefix: String,

    #[serde(default = "default_session_header")]
    pub response_header: String,

    #[serde(default = "default_session_prefix")]
    pub response_prefix: String,
}

/// Values that replace whatever the file and environment say
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub redis_url: Option<String>,
    pub listen_addr: Option<String>,
    pub store: Option<StoreBackend>,
}

/// Settings published to browsers at `/statefull.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    pub external_url: String,
    pub jwt_request_prefix: String,
    pub jwt_request_header: String,
    pub jwt_response_prefix: String,
    pub jwt_response_header: String,

    pub node_hash_header: String,
    pub node_salt_header: String,
    pub node_time_header: String,
    pub node_url_header: String,
    pub node_id_header: String,

    pub node_hash_iterations: u32,
    pub node_hash_keylen: usize,
    pub node_hash_algorithm: String,
}

/// Settings only authenticated nodes may read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExportSettings {
    #[serde(flatten)]
    pub public: ExportSettings,
    pub jwt_algorithm: String,
    pub jwt_secret: String,
    pub node_heartbeat_timeout: u64,
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_heartbeat_timeout() -> u64 { DEFAULT_HEARTBEAT_TIMEOUT_MS }
fn default_node_iterations() -> u32 { hash::NODE_ITERATIONS }
fn default_node_key_length() -> usize { hash::NODE_KEY_LENGTH }
fn default_hash_algorithm() -> String { hash::DEFAULT_ALGORITHM.to_string() }
fn default_hash_header() -> String { headers::NODE_HASH.to_string() }
fn default_salt_header() -> String { headers::NODE_SALT.to_string() }
fn default_time_header() -> String { headers::NODE_TIME.to_string() }
fn default_url_header() -> String { headers::NODE_URL.to_string() }
fn default_id_header() -> String { headers::NODE_ID.to_string() }
fn default_session_algorithm() -> String { session::DEFAULT_ALGORITHM.to_string() }
fn default_session_header() -> String { session::DEFAULT_HEADER.to_string() }
fn default_session_prefix() -> String { session::DEFAULT_PREFIX.to_string() }

/// Parse a configured header name
pub fn parse_header_name(name: &str) -> statefull_common::Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| StatefullError::Config(format!("invalid header name '{name}'")))
}

impl Default for NodeHeaderConfig {
    fn default() -> Self {
        Self {
            hash: default_hash_header(),
            salt: default_salt_header(),
            time: default_time_header(),
            url: default_url_header(),
            id: default_id_header(),
        }
    }
}

impl NodeHeaderConfig {
    pub fn names(&self) -> statefull_common::Result<NodeHeaderNames> {
        Ok(NodeHeaderNames {
            hash: parse_header_name(&self.hash)?,
            salt: parse_header_name(&self.salt)?,
            time: parse_header_name(&self.time)?,
            url: parse_header_name(&self.url)?,
            id: parse_header_name(&self.id)?,
        })
    }
}

impl NodeConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            hash_iterations: default_node_iterations(),
            hash_key_length: default_node_key_length(),
            hash_algorithm: default_hash_algorithm(),
            time_window_ms: None,
            headers: NodeHeaderConfig::default(),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl SessionConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: default_session_algorithm(),
            request_header: default_session_header(),
            request_prefix: default_session_prefix(),
            response_header: default_session_header(),
            response_prefix: default_session_prefix(),
        }
    }
}

impl AppConfig {
    /// Configuration with every optional field defaulted
    pub fn new(
        external_url: impl Into<String>,
        node_secret: impl Into<String>,
        session_secret: impl Into<String>,
    ) -> Self {
        Self {
            external_url: external_url.into(),
            listen_addr: default_listen_addr(),
            store: StoreBackend::default(),
            redis_url: default_redis_url(),
            node: NodeConfig::new(node_secret),
            session: SessionConfig::new(session_secret),
        }
    }

    /// Load configuration from an optional file and `STATEFULL__*` env vars, then apply overrides
    pub fn load(config_path: &str, overrides: &ConfigOverrides) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("STATEFULL").separator("__"))
            .build()
            .context("Failed to load configuration")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config (external_url, node.secret and session.secret are required)")?;

        // Apply CLI overrides
        if let Some(ref redis_url) = overrides.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = overrides.listen_addr {
            config.listen_addr = listen.clone();
        }
        if let Some(store) = overrides.store {
            config.store = store;
        }

        Ok(config)
    }

    pub fn export(&self) -> ExportSettings {
        ExportSettings {
            external_url: self.external_url.clone(),
            jwt_request_prefix: self.session.request_prefix.clone(),
            jwt_request_header: self.session.request_header.clone(),
            jwt_response_prefix: self.session.response_prefix.clone(),
            jwt_response_header: self.session.response_header.clone(),
            node_hash_header: self.node.headers.hash.clone(),
            node_salt_header: self.node.headers.salt.clone(),
            node_time_header: self.node.headers.time.clone(),
            node_url_header: self.node.headers.url.clone(),
            node_id_header: self.node.headers.id.clone(),
            node_hash_iterations: self.node.hash_iterations,
            node_hash_keylen: self.node.hash_key_length,
            node_hash_algorithm: self.node.hash_algorithm.clone(),
        }
    }

    pub fn node_export(&self) -> NodeExportSettings {
        NodeExportSettings {
            public: self.export(),
            jwt_algorithm: self.session.algorithm.clone(),
            jwt_secret: self.session.secret.clone(),
            node_heartbeat_timeout: self.node.heartbeat_timeout_ms,
        }
    }
}
