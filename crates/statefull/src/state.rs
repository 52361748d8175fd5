//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;

use statefull_common::StatefullError;

use crate::allocate::{AllocationDispatcher, AllocationPolicy};
use crate::auth::NodeAuthGuard;
use crate::config::{AppConfig, NodeHeaderNames, StoreBackend};
use crate::hash::{Pbkdf2Hasher, SecretHasher};
use crate::registry::{
    Clock, MemoryNodeStore, NodeRegistry, NodeStore, NodeTimeoutHook, RedisNodeStore, SystemClock,
};
use crate::session::{IdGenerator, SessionCodec, SessionInitializer, SessionValidator, uuid_generator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Node registry with heartbeat expiry
    pub registry: NodeRegistry,

    /// Node proof verification
    pub guard: Arc<NodeAuthGuard>,

    /// Session token codec
    pub sessions: Arc<SessionCodec>,

    /// Fresh session ids
    pub id_generator: IdGenerator,

    /// Allocation policy runner
    pub allocator: Arc<AllocationDispatcher>,

    /// First-visit hook
    pub init_session: Option<Arc<dyn SessionInitializer>>,

    /// Session gatekeeper for browser routes
    pub validate_session: Option<Arc<dyn SessionValidator>>,
}

impl AppState {
    pub fn builder(
        config: AppConfig,
        store: Arc<dyn NodeStore>,
        policy: Arc<dyn AllocationPolicy>,
    ) -> AppStateBuilder {
        AppStateBuilder {
            config,
            store,
            policy,
            hasher: Arc::new(Pbkdf2Hasher),
            clock: Arc::new(SystemClock),
            id_generator: uuid_generator(),
            node_timeout: None,
            init_session: None,
            validate_session: None,
        }
    }

    pub fn node_headers(&self) -> &NodeHeaderNames {
        self.guard.header_names()
    }
}

/// Open the configured node store
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn NodeStore>> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryNodeStore::new())),
        StoreBackend::Redis => {
            // Connection manager handles reconnection
            let store = RedisNodeStore::connect(&config.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
    }
}

/// Wires collaborators into an [`AppState`]
pub struct AppStateBuilder {
    config: AppConfig,
    store: Arc<dyn NodeStore>,
    policy: Arc<dyn AllocationPolicy>,
    hasher: Arc<dyn SecretHasher>,
    clock: Arc<dyn Clock>,
    id_generator: IdGenerator,
    node_timeout: Option<Arc<dyn NodeTimeoutHook>>,
    init_session: Option<Arc<dyn SessionInitializer>>,
    validate_session: Option<Arc<dyn SessionValidator>>,
}

impl AppStateBuilder {
    pub fn hasher(mut self, hasher: Arc<dyn SecretHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Clock for heartbeat expiry and proof freshness
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn node_timeout(mut self, hook: Arc<dyn NodeTimeoutHook>) -> Self {
        self.node_timeout = Some(hook);
        self
    }

    pub fn init_session(mut self, init: Arc<dyn SessionInitializer>) -> Self {
        self.init_session = Some(init);
        self
    }

    pub fn validate_session(mut self, validator: Arc<dyn SessionValidator>) -> Self {
        self.validate_session = Some(validator);
        self
    }

    pub fn build(self) -> statefull_common::Result<AppState> {
        if self.config.external_url.trim().is_empty() {
            return Err(StatefullError::Config("external_url must not be empty".into()));
        }

        let guard = NodeAuthGuard::new(&self.config.node, self.hasher)?.with_clock(self.clock.clone());
        let sessions = SessionCodec::new(&self.config.session)?;

        let mut registry = NodeRegistry::new(self.store, self.config.node.heartbeat_timeout())
            .with_clock(self.clock);
        if let Some(hook) = self.node_timeout {
            registry = registry.with_timeout_hook(hook);
        }

        Ok(AppState {
            config: Arc::new(self.config),
            registry,
            guard: Arc::new(guard),
            sessions: Arc::new(sessions),
            id_generator: self.id_generator,
            allocator: Arc::new(AllocationDispatcher::new(self.policy)),
            init_session: self.init_session,
            validate_session: self.validate_session,
        })
    }
}
