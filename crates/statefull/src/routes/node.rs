//! Node-facing endpoints: config, register, heartbeat, unregister, listing.

use axum::{
    Extension, Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;

use statefull_common::{Node, StatefullError};

use super::ApiError;
use crate::auth::header_str;
use crate::config::NodeExportSettings;
use crate::registry::NodeLookup;
use crate::state::AppState;

/// Node resolved by [`resolve_node`]
#[derive(Debug, Clone)]
pub struct ResolvedNode(pub Node);

/// Guard: reject requests without a valid node proof
pub async fn require_node_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = state.guard.verify_headers(request.headers()) {
        tracing::warn!(
            path = %request.uri().path(),
            error = %e,
            "Node authentication failed"
        );
        return ApiError(e).into_response();
    }
    next.run(request).await
}

/// Guard: resolve the calling node by id (preferred) or url, evicting it if stale
pub async fn resolve_node(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let names = state.node_headers();
    let lookup = header_str(request.headers(), &names.id).and_then(|id| {
        NodeLookup::from_headers(id, header_str(request.headers(), &names.url)?)
    });

    let resolved = match lookup {
        Ok(lookup) => state.registry.resolve(&lookup).await,
        Err(e) => Err(e),
    };

    match resolved {
        Ok(node) => {
            request.extensions_mut().insert(ResolvedNode(node));
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Node resolution failed");
            ApiError(e).into_response()
        }
    }
}

/// Full configuration for authenticated nodes
pub async fn node_config(State(state): State<AppState>) -> Json<NodeExportSettings> {
    Json(state.config.node_export())
}

/// Register a new node at the url given in the url header
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Node>, ApiError> {
    let names = state.node_headers();
    let url = header_str(&headers, &names.url)?
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            StatefullError::InvalidInput(format!("'{}' header value is not set or empty", names.url))
        })?;

    let node = state.registry.register(url).await?;
    tracing::info!(node_id = node.id, url = %node.url, "Node joined the pool");
    Ok(Json(node))
}

/// Refresh the calling node's heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(ResolvedNode(node)): Extension<ResolvedNode>,
) -> Result<Json<Node>, ApiError> {
    let ticked = state
        .registry
        .heartbeat(node.id)
        .await?
        .ok_or_else(|| StatefullError::NodeNotFound(format!("node {} is gone", node.id)))?;
    Ok(Json(ticked))
}

/// Remove the calling node from the pool
pub async fn unregister(
    State(state): State<AppState>,
    Extension(ResolvedNode(node)): Extension<ResolvedNode>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .unregister(node.id)
        .await?
        .ok_or_else(|| StatefullError::NodeNotFound(format!("node {} is gone", node.id)))?;
    Ok(StatusCode::OK)
}

/// Every registered node keyed by stringified id
pub async fn nodes(State(state): State<AppState>) -> Result<Json<BTreeMap<String, Node>>, ApiError> {
    let nodes = state.registry.nodes().await?;
    Ok(Json(
        nodes.into_iter().map(|n| (n.id.to_string(), n)).collect(),
    ))
}
