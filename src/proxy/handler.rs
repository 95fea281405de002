use axum::{
    body,
    extract::{Query, Request, State},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth;
use crate::proxy::{response, UPSTREAM_ORIGIN};
use crate::state::AppState;
use crate::ws::frame::Frame;

/// Headers governing a single transport hop; never forwarded to the agent.
/// `Host` is deliberately not in this list and travels through.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Query parameters recognized on the proxy endpoint.
#[derive(Debug, Deserialize)]
pub struct ProxyAuthQuery {
    pub key: Option<String>,
}

/// Catch-all proxy endpoint. Authenticates the caller, wraps the request in
/// an `http_request` frame, dispatches it on a round-robin-selected agent
/// channel and bridges the correlated response frames back onto the HTTP
/// response.
pub async fn proxy_request(
    State(state): State<AppState>,
    Query(query): Query<ProxyAuthQuery>,
    request: Request,
) -> Response {
    let user_id = match auth::authenticate_proxy_request(
        request.headers(),
        query.key.as_deref(),
        state.api_key.as_deref(),
    ) {
        Ok(user_id) => user_id,
        Err((status, message)) => return (status, message).into_response(),
    };

    let request_id = Uuid::new_v4().to_string();

    // Register the sink before dispatch; the guard deregisters on every exit
    // path, including cancellation.
    let mut pending = state.pending.register(request_id.clone());

    let Some(entry) = state.registry.select(&user_id) else {
        tracing::warn!(user_id = %user_id, "no agent connected");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable: No active client connected",
        )
            .into_response();
    };
    pending.attach_entry(entry.clone());

    let (parts, request_body) = request.into_parts();
    let body_bytes = match body::to_bytes(request_body, usize::MAX).await {
        Ok(body_bytes) => body_bytes,
        Err(error) => {
            tracing::warn!(request_id = %request_id, error = %error, "failed to read request body");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read request body",
            )
                .into_response();
        }
    };

    let request_uri = parts
        .uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", UPSTREAM_ORIGIN, request_uri);

    let mut headers = Map::new();
    for name in parts.headers.keys() {
        if is_hop_by_hop(name) {
            continue;
        }
        let values: Vec<Value> = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(|value| Value::String(value.to_owned()))
            .collect();
        headers.insert(name.as_str().to_owned(), Value::Array(values));
    }

    let frame = Frame::http_request(
        request_id.clone(),
        parts.method.as_str(),
        url,
        headers,
        String::from_utf8_lossy(&body_bytes).into_owned(),
    );

    if let Err(error) = entry.send_frame(&frame).await {
        tracing::warn!(
            user_id = %user_id,
            request_id = %request_id,
            error = %error,
            "failed to dispatch request frame"
        );
        return (
            StatusCode::BAD_GATEWAY,
            "Bad Gateway: Failed to send request to client",
        )
            .into_response();
    }

    tracing::debug!(
        user_id = %user_id,
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "request frame dispatched"
    );

    response::drive(pending).await
}
