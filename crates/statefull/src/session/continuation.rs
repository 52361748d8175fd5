//! Session continuation across one request/response cycle.
//!
//! 1. Resolve the session from the request token (fresh on any failure).
//! 2. Pin its `id` and `new` flag as the values every re-signature uses.
//! 3. Hand the session to handlers through a [`SessionHandle`] extension.
//! 4. Sign it into the response exactly once, at commit time.

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use statefull_common::Session;

use super::codec::SessionCodec;
use crate::state::AppState;

/// Runs for first-time visitors before the request continues.
/// `Err(response)` ends the request with that response.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    async fn init_session(&self, session: &SessionHandle, headers: &HeaderMap) -> Result<(), Response>;
}

/// Gatekeeper between session resolution and the handler.
/// `Err(response)` ends the request with that response.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, session: &SessionHandle, headers: &HeaderMap) -> Result<(), Response>;
}

struct HandleInner {
    session: RwLock<Session>,
    /// Authoritative values restored before signing
    id: String,
    is_new: bool,
    committed: AtomicBool,
    codec: Arc<SessionCodec>,
}

/// Request-scoped session shared between middleware and handlers
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl SessionHandle {
    pub fn new(session: Session, codec: Arc<SessionCodec>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: session.id.clone(),
                is_new: session.is_new,
                session: RwLock::new(session),
                committed: AtomicBool::new(false),
                codec,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_new(&self) -> bool {
        self.inner.is_new
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.inner.session.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.inner.session.write().await
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.session.read().await.clone()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::SeqCst)
    }

    /// Sign the session into `headers`. Only the first call does anything;
    /// returns whether this call attached the header.
    pub async fn commit(&self, headers: &mut HeaderMap) -> bool {
        if self.inner.committed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut session = self.inner.session.write().await;
        session.strip_reserved();
        session.id.clone_from(&self.inner.id);
        session.is_new = self.inner.is_new;

        match self.inner.codec.write(&session, headers) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session_id = %self.inner.id, error = %e, "Failed to sign session");
                false
            }
        }
    }
}

/// Middleware: resolve the session, run the initializer for new visitors,
/// and sign the session into whatever response comes back.
pub async fn continue_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = state.sessions.resolve(request.headers(), &state.id_generator);
    let handle = SessionHandle::new(session, state.sessions.clone());
    request.extensions_mut().insert(handle.clone());

    tracing::debug!(session_id = %handle.id(), new = handle.is_new(), "Session resolved");

    let mut response = match (&state.init_session, handle.is_new()) {
        (Some(init), true) => {
            let outcome = init.init_session(&handle, request.headers()).await;
            match outcome {
                Ok(()) => next.run(request).await,
                Err(response) => response,
            }
        }
        _ => next.run(request).await,
    };

    handle.commit(response.headers_mut()).await;
    response
}

/// Middleware: apply the configured session validator, if any
pub async fn validate_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(validator) = state.validate_session.clone() else {
        return next.run(request).await;
    };

    let Some(handle) = request.extensions().get::<SessionHandle>().cloned() else {
        tracing::error!("Session validator mounted without session continuation");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let outcome = validator.validate(&handle, request.headers()).await;
    match outcome {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
