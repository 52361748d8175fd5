//! # Statefull - session affinity router
//!
//! Pins browser sessions to stateful backend nodes. Nodes register, prove
//! knowledge of a shared secret, and stay in the pool by heartbeating.
//! Browsers carry their identity in a signed token the router re-signs on
//! every response.
//!
//! ## Architecture
//! ```text
//! Browser --token--> continuation --> validator --> allocation policy --> node url
//! Node ----proof---> auth guard --> resolver --> registry --> NodeStore (memory | Redis)
//! ```

pub mod allocate;
pub mod auth;
pub mod config;
pub mod hash;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;

pub use allocate::{AllocationContext, AllocationError, AllocationPolicy, RoundRobinPolicy, StickyPolicy};
pub use auth::{NodeAuthGuard, NodeProof};
pub use config::AppConfig;
pub use registry::{NodeLookup, NodeRegistry, NodeStore};
pub use routes::create_router;
pub use session::{SessionCodec, SessionHandle};
pub use state::AppState;
pub use statefull_common::{Node, Session, StatefullError};
