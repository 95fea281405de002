use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recognized frame type strings on the agent channel.
pub mod kind {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const HTTP_REQUEST: &str = "http_request";
    pub const HTTP_RESPONSE: &str = "http_response";
    pub const STREAM_START: &str = "stream_start";
    pub const STREAM_CHUNK: &str = "stream_chunk";
    pub const STREAM_END: &str = "stream_end";
    pub const ERROR: &str = "error";
}

/// One JSON message on the agent channel. `id` correlates a request with all
/// of its response frames; `payload` carries the type-specific fields.
/// Binary bodies are conveyed as base64-encoded strings by convention — the
/// gateway passes them through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl Frame {
    /// Heartbeat reply echoing the ping's id.
    pub fn pong(id: &str) -> Self {
        Frame {
            id: id.to_owned(),
            kind: kind::PONG.to_owned(),
            payload: Map::new(),
        }
    }

    /// Request frame sent to the agent. `url` is already rewritten to the
    /// upstream absolute form; `headers` maps name to an array of values.
    pub fn http_request(
        id: String,
        method: &str,
        url: String,
        headers: Map<String, Value>,
        body: String,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("method".to_owned(), Value::String(method.to_owned()));
        payload.insert("url".to_owned(), Value::String(url));
        payload.insert("headers".to_owned(), Value::Object(headers));
        payload.insert("body".to_owned(), Value::String(body));
        Frame {
            id,
            kind: kind::HTTP_REQUEST.to_owned(),
            payload,
        }
    }
}

/// Whether a frame type is one the agent sends in reply to a proxied request.
pub fn is_response_kind(kind: &str) -> bool {
    matches!(
        kind,
        kind::HTTP_RESPONSE
            | kind::STREAM_START
            | kind::STREAM_CHUNK
            | kind::STREAM_END
            | kind::ERROR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_with_payload() {
        let frame: Frame = serde_json::from_str(
            r#"{"id":"r1","type":"http_response","payload":{"status":200,"body":"ok"}}"#,
        )
        .unwrap();
        assert_eq!(frame.id, "r1");
        assert_eq!(frame.kind, kind::HTTP_RESPONSE);
        assert_eq!(frame.payload["status"], 200);
    }

    #[test]
    fn missing_payload_defaults_to_empty() {
        let frame: Frame = serde_json::from_str(r#"{"id":"p1","type":"ping"}"#).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn unknown_type_is_preserved() {
        let frame: Frame =
            serde_json::from_str(r#"{"id":"x","type":"telemetry","payload":{}}"#).unwrap();
        assert_eq!(frame.kind, "telemetry");
        assert!(!is_response_kind(&frame.kind));
    }

    #[test]
    fn pong_serializes_without_payload_key() {
        let text = serde_json::to_string(&Frame::pong("p1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["id"], "p1");
        assert!(value.get("payload").is_none());
    }
}
