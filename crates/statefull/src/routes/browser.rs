//! Browser-facing allocation endpoint.

use axum::{
    Extension,
    extract::State,
    http::HeaderMap,
};

use super::ApiError;
use crate::allocate::AllocationContext;
use crate::session::SessionHandle;
use crate::state::AppState;

/// Pick a node for this session and answer with its url as plain text.
///
/// Returns:
/// - 200: node url
/// - 400: allocation policy failed
/// - 500: allocation policy broke its contract
/// - 503: no node available
pub async fn allocate(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let ctx = AllocationContext {
        session,
        headers,
        registry: state.registry.clone(),
    };

    let node = state.allocator.dispatch(&ctx).await?;
    Ok(node.url)
}
