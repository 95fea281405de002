use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tokio::time::timeout;

use crate::registry::ConnectionEntry;
use crate::state::AppState;
use crate::ws::frame::{self, Frame};
use crate::ws::READ_TIMEOUT;

/// Read loop for one agent channel. Owns the read half of the socket for the
/// lifetime of the connection; the write half lives in the registry entry.
///
/// Every inbound message refreshes the read deadline and the entry's
/// last-active timestamp. Deadline expiry, read errors and client-initiated
/// close all leave through the same cleanup path: deregister the entry, close
/// the sinks of requests still in flight on this channel, close the socket.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (writer, mut reader) = socket.split();
    let entry = state.registry.add(&user_id, writer);

    loop {
        let message = match timeout(READ_TIMEOUT, reader.next()).await {
            Err(_) => {
                tracing::info!(user_id = %user_id, "read deadline expired, closing agent channel");
                break;
            }
            Ok(None) => {
                tracing::info!(user_id = %user_id, "agent channel stream ended");
                break;
            }
            Ok(Some(Err(error))) => {
                tracing::warn!(user_id = %user_id, error = %error, "agent channel read error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        entry.touch();

        let keep_going = match message {
            Message::Text(text) => handle_frame(&entry, &state, &user_id, text.as_bytes()).await,
            Message::Binary(data) => handle_frame(&entry, &state, &user_id, &data).await,
            Message::Close(close_frame) => {
                tracing::info!(user_id = %user_id, reason = ?close_frame, "agent initiated close");
                false
            }
            // Transport-level control frames count as activity but carry no
            // application frame.
            Message::Ping(_) | Message::Pong(_) => true,
        };
        if !keep_going {
            break;
        }
    }

    state.registry.remove(&user_id, &entry);
    for request_id in entry.take_in_flight() {
        tracing::debug!(
            user_id = %user_id,
            request_id = %request_id,
            "closing sink of request in flight on dead channel"
        );
        state.pending.close(&request_id);
    }
    entry.close().await;
    tracing::info!(user_id = %user_id, "read loop closed");
}

/// Parse and dispatch one inbound frame. Returns `false` when the channel
/// must be torn down (pong write failure). Malformed and unknown frames are
/// logged and ignored.
async fn handle_frame(
    entry: &Arc<ConnectionEntry>,
    state: &AppState,
    user_id: &str,
    data: &[u8],
) -> bool {
    let parsed = match serde_json::from_slice::<Frame>(data) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(user_id = %user_id, error = %error, "malformed frame, ignoring");
            return true;
        }
    };

    match parsed.kind.as_str() {
        frame::kind::PING => {
            if let Err(error) = entry.send_frame(&Frame::pong(&parsed.id)).await {
                tracing::warn!(
                    user_id = %user_id,
                    error = %error,
                    "failed to send pong, closing agent channel"
                );
                return false;
            }
            true
        }
        kind if frame::is_response_kind(kind) => {
            state.pending.dispatch(parsed);
            true
        }
        other => {
            tracing::warn!(user_id = %user_id, kind = other, "unknown frame type from agent");
            true
        }
    }
}
