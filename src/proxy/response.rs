use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tokio::time::{timeout_at, Instant};

use crate::pending::PendingRequest;
use crate::proxy::REQUEST_TIMEOUT;
use crate::ws::frame::kind;

/// Drive the response side of one proxied request: drain correlated frames
/// from the pending sink and turn them into an HTTP response.
///
/// The commit boundary is returning the response head. Until then, timeouts
/// and errors can still pick the status code (504, 500, agent-supplied).
/// Afterwards the only remaining moves are streaming more body bytes or
/// truncating.
pub async fn drive(mut pending: PendingRequest) -> Response {
    let deadline = Instant::now() + REQUEST_TIMEOUT;

    loop {
        let frame = match timeout_at(deadline, pending.recv()).await {
            Err(_) => {
                tracing::warn!(
                    request_id = %pending.id(),
                    "gateway timeout waiting for agent response"
                );
                return (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout").into_response();
            }
            Ok(None) => {
                tracing::warn!(
                    request_id = %pending.id(),
                    "agent channel closed before response"
                );
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error: Response channel closed unexpectedly",
                )
                    .into_response();
            }
            Ok(Some(frame)) => frame,
        };

        match frame.kind.as_str() {
            kind::HTTP_RESPONSE => return unary_response(&frame.payload),
            kind::STREAM_START => {
                return streaming_response(Some(&frame.payload), None, pending, deadline)
            }
            kind::STREAM_CHUNK => {
                // The agent skipped stream_start; commit an implicit 200 and
                // carry the chunk over into the stream.
                tracing::warn!(
                    request_id = %pending.id(),
                    "stream_chunk before stream_start, committing with 200"
                );
                let first_chunk = frame_body(&frame.payload).map(Bytes::from);
                return streaming_response(None, first_chunk, pending, deadline);
            }
            kind::STREAM_END => return StatusCode::OK.into_response(),
            kind::ERROR => return error_response(&frame.payload),
            other => {
                tracing::warn!(
                    request_id = %pending.id(),
                    kind = other,
                    "unexpected frame while awaiting response head"
                );
            }
        }
    }
}

/// Single complete response: status, headers and body from one frame.
fn unary_response(payload: &Map<String, Value>) -> Response {
    let body = frame_body(payload).unwrap_or_default();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = payload_status(payload, StatusCode::OK);
    apply_headers(response.headers_mut(), payload);
    response
}

/// Agent-reported failure before the commit boundary. The agent may supply
/// the status; 502 otherwise.
fn error_response(payload: &Map<String, Value>) -> Response {
    let message = payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Bad Gateway: Client reported an error")
        .to_owned();
    let status = payload_status(payload, StatusCode::BAD_GATEWAY);
    (status, message).into_response()
}

struct StreamState {
    pending: PendingRequest,
    deadline: Instant,
    first_chunk: Option<Bytes>,
}

/// Commit the response head and stream body chunks as they arrive. The body
/// ends on `stream_end`; a timeout, sink closure or post-commit error can
/// only truncate it.
fn streaming_response(
    head: Option<&Map<String, Value>>,
    first_chunk: Option<Bytes>,
    pending: PendingRequest,
    deadline: Instant,
) -> Response {
    let status = head
        .map(|payload| payload_status(payload, StatusCode::OK))
        .unwrap_or(StatusCode::OK);

    let state = StreamState {
        pending,
        deadline,
        first_chunk,
    };
    let stream = futures_util::stream::unfold(state, |mut state| async move {
        if let Some(chunk) = state.first_chunk.take() {
            return Some((Ok::<Bytes, Infallible>(chunk), state));
        }
        loop {
            let frame = match timeout_at(state.deadline, state.pending.recv()).await {
                Err(_) => {
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        "gateway timeout mid-stream, truncating response"
                    );
                    return None;
                }
                Ok(None) => {
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        "agent channel closed mid-stream, truncating response"
                    );
                    return None;
                }
                Ok(Some(frame)) => frame,
            };

            match frame.kind.as_str() {
                kind::STREAM_CHUNK => {
                    if let Some(data) = frame_body(&frame.payload) {
                        return Some((Ok(Bytes::from(data)), state));
                    }
                }
                kind::STREAM_END => return None,
                kind::ERROR => {
                    // Headers are committed; the status cannot be amended.
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        payload = ?frame.payload,
                        "agent reported error after stream started, truncating response"
                    );
                    return None;
                }
                kind::STREAM_START => {
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        "duplicate stream_start, ignoring"
                    );
                }
                kind::HTTP_RESPONSE => {
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        "http_response after stream started, closing"
                    );
                    return None;
                }
                other => {
                    tracing::warn!(
                        request_id = %state.pending.id(),
                        kind = other,
                        "unexpected frame mid-stream"
                    );
                }
            }
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    if let Some(payload) = head {
        apply_headers(response.headers_mut(), payload);
    }
    response
}

/// Parse `status` from a payload. JSON numbers that are not valid HTTP status
/// codes, and non-numbers, fall back to the default.
fn payload_status(payload: &Map<String, Value>, default: StatusCode) -> StatusCode {
    payload
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(default)
}

/// Materialize the `headers` payload onto the response. An array value
/// appends each element (duplicates preserved); a bare string replaces.
/// Names and values the HTTP layer rejects are skipped.
fn apply_headers(headers: &mut HeaderMap, payload: &Map<String, Value>) {
    let Some(Value::Object(payload_headers)) = payload.get("headers") else {
        return;
    };
    for (name, value) in payload_headers {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "skipping invalid header name from agent");
            continue;
        };
        match value {
            Value::Array(values) => {
                for item in values {
                    if let Some(item) = item.as_str() {
                        if let Ok(header_value) = HeaderValue::from_str(item) {
                            headers.append(header_name.clone(), header_value);
                        }
                    }
                }
            }
            Value::String(single) => {
                if let Ok(header_value) = HeaderValue::from_str(single) {
                    headers.insert(header_name, header_value);
                }
            }
            _ => {}
        }
    }
}

/// Body bytes of a response frame: `data` (stream chunks) wins over `body`
/// (unary responses).
fn frame_body(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("data")
        .and_then(Value::as_str)
        .or_else(|| payload.get("body").and_then(Value::as_str))
        .map(str::to_owned)
}
