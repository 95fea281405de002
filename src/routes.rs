use axum::{routing::get, Router};

use crate::proxy;
use crate::state::AppState;
use crate::ws;

/// Build the axum Router: the agent upgrade endpoint plus the catch-all
/// proxy. Every path except `/v1/ws` is proxied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ws", get(ws::handler::ws_upgrade))
        .fallback(proxy::handler::proxy_request)
        .with_state(state)
}
