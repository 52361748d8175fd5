//! Browser session continuation.
//!
//! Sessions live entirely client-side as signed tokens; the router keeps no
//! session memory. An invalid or missing token silently starts a new session.

mod codec;
mod continuation;

pub use codec::{IdGenerator, SessionCodec, uuid_generator};
pub use continuation::{
    SessionHandle, SessionInitializer, SessionValidator, continue_session, validate_session,
};
