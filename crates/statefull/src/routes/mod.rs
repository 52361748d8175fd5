//! HTTP route handlers for the Statefull router.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use statefull_common::StatefullError;

use crate::config::ExportSettings;
use crate::session::{continue_session, validate_session};
use crate::state::AppState;

mod browser;
mod health;
mod node;

pub use node::ResolvedNode;

/// Error response: status from the error taxonomy, message as plain text
#[derive(Debug)]
pub struct ApiError(pub StatefullError);

impl From<StatefullError> for ApiError {
    fn from(err: StatefullError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Public configuration for browsers and nodes
        .route("/statefull.json", get(public_config))

        .merge(node_routes(state.clone()))
        .merge(browser_routes(state.clone()))

        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}

/// Node routes. Every one needs a node proof; the ones acting on an
/// existing node also resolve it first.
fn node_routes(state: AppState) -> Router<AppState> {
    let resolved = Router::new()
        .route("/node/unregister", post(node::unregister))
        .route("/node/heartbeat", post(node::heartbeat))
        .route("/node/nodes", post(node::nodes))
        .route_layer(middleware::from_fn_with_state(state.clone(), node::resolve_node));

    Router::new()
        .route("/node/statefull.json", get(node::node_config))
        .route("/node/register", post(node::register))
        .merge(resolved)
        .route_layer(middleware::from_fn_with_state(state, node::require_node_auth))
}

/// Browser routes: session continuation, then validation, then the handler
fn browser_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/browser/allocate", get(browser::allocate))
        .route_layer(middleware::from_fn_with_state(state.clone(), validate_session))
        .route_layer(middleware::from_fn_with_state(state, continue_session))
}

async fn public_config(State(state): State<AppState>) -> Json<ExportSettings> {
    Json(state.config.export())
}
