//! # Statefull Common
//!
//! Shared types, errors, and constants used across Statefull components.
//!
//! ## Modules
//! - `types` - Core data structures (Node, Session, SecretHash)
//! - `error` - Common error taxonomy
//! - `constants` - Shared defaults (headers, hash parameters, timeouts)

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Result, StatefullError};
pub use types::*;
