use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the agent upgrade endpoint.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub auth_token: Option<String>,
}

/// GET /v1/ws?auth_token=TOKEN
/// Agent upgrade endpoint. Authentication happens before the upgrade: an
/// absent or invalid token is answered with a plain 401, no handshake.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match auth::validate_agent_token(params.auth_token.as_deref()) {
        Ok(user_id) => user_id,
        Err(reason) => {
            tracing::warn!(reason = reason, "agent authentication failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    tracing::info!(user_id = %user_id, "agent channel authenticated");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}
