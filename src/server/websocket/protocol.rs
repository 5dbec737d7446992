//! Frames of the `graphql-transport-ws` and legacy `graphql-ws` protocols.
//!
//! Inbound frames are accepted under either protocol's naming
//! (`subscribe`/`start`, `complete`/`stop`). Outbound subscription payloads
//! are sent under both names by the session.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::server::auth::strip_bearer;

pub const TRANSPORT_WS: &str = "graphql-transport-ws";
pub const LEGACY_WS: &str = "graphql-ws";

/// Close code sent when `connection_init` does not arrive in time.
pub const INIT_TIMEOUT_CLOSE_CODE: u16 = 4408;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    TransportWs,
    Legacy,
}

impl Protocol {
    /// Picks the protocol from `Sec-WebSocket-Protocol`, preferring
    /// `graphql-transport-ws` when the client offers both.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let offered: Vec<String> = headers
            .get_all("sec-websocket-protocol")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|p| p.trim().to_ascii_lowercase())
            .collect();
        if offered.iter().any(|p| p == TRANSPORT_WS) {
            Some(Protocol::TransportWs)
        } else if offered.iter().any(|p| p == LEGACY_WS) {
            Some(Protocol::Legacy)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::TransportWs => TRANSPORT_WS,
            Protocol::Legacy => LEGACY_WS,
        }
    }
}

/// A frame as received, before its type is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrameKind {
    ConnectionInit,
    Subscribe,
    Complete,
    Ping,
    Pong,
    ConnectionTerminate,
    Unknown(String),
}

impl RawFrame {
    pub fn kind(&self) -> ClientFrameKind {
        match self.kind.as_str() {
            "connection_init" => ClientFrameKind::ConnectionInit,
            "subscribe" | "start" => ClientFrameKind::Subscribe,
            "complete" | "stop" => ClientFrameKind::Complete,
            "ping" => ClientFrameKind::Ping,
            "pong" => ClientFrameKind::Pong,
            "connection_terminate" => ClientFrameKind::ConnectionTerminate,
            other => ClientFrameKind::Unknown(other.to_string()),
        }
    }

    /// The non-empty id, if any.
    pub fn operation_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Token from `payload.authorization` or `payload.Authorization`, with
    /// any `Bearer` scheme removed.
    pub fn init_token(&self) -> String {
        let Some(payload) = self.payload.as_ref().and_then(Value::as_object) else {
            return String::new();
        };
        let raw = payload
            .get("authorization")
            .or_else(|| payload.get("Authorization"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        strip_bearer(raw).unwrap_or(raw.trim()).to_string()
    }
}

/// `payload` of `subscribe`/`start`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribePayload {
    pub query: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ServerFrame {
    fn new(kind: &'static str, id: Option<&str>, payload: Option<Value>) -> Self {
        Self {
            id: id.map(str::to_string),
            kind,
            payload,
        }
    }

    pub fn connection_ack() -> Self {
        Self::new("connection_ack", None, None)
    }

    pub fn next(id: &str, payload: Value) -> Self {
        Self::new("next", Some(id), Some(payload))
    }

    /// Legacy twin of [`ServerFrame::next`].
    pub fn data(id: &str, payload: Value) -> Self {
        Self::new("data", Some(id), Some(payload))
    }

    /// `payload` is an array of `{message, ..}` objects.
    pub fn error(id: Option<&str>, errors: Value) -> Self {
        Self::new("error", id, Some(errors))
    }

    pub fn error_message(id: Option<&str>, message: &str) -> Self {
        Self::error(id, json!([{ "message": message }]))
    }

    pub fn complete(id: &str) -> Self {
        Self::new("complete", Some(id), None)
    }

    pub fn ping() -> Self {
        Self::new("ping", None, None)
    }

    pub fn pong() -> Self {
        Self::new("pong", None, None)
    }

    /// Legacy keep-alive.
    pub fn keep_alive() -> Self {
        Self::new("ka", None, None)
    }
}

/// Pulls `{data, errors}` apart; `data` is `None` when null or absent.
pub fn split_response(mut body: Map<String, Value>) -> (Option<Value>, Option<Value>) {
    let data = body.remove("data").filter(|d| !d.is_null());
    let errors = body
        .remove("errors")
        .filter(|e| e.as_array().map(|a| !a.is_empty()).unwrap_or(false));
    (data, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn negotiates_the_modern_protocol_first() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("graphql-ws, graphql-transport-ws"),
        );
        assert_eq!(Protocol::from_headers(&headers), Some(Protocol::TransportWs));

        headers.insert("sec-websocket-protocol", HeaderValue::from_static("graphql-ws"));
        assert_eq!(Protocol::from_headers(&headers), Some(Protocol::Legacy));
        assert_eq!(Protocol::from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn accepts_both_namings() {
        let start: RawFrame = serde_json::from_str(r#"{"id":"1","type":"start"}"#).unwrap();
        let stop: RawFrame = serde_json::from_str(r#"{"id":"1","type":"stop"}"#).unwrap();
        assert_eq!(start.kind(), ClientFrameKind::Subscribe);
        assert_eq!(stop.kind(), ClientFrameKind::Complete);
    }

    #[test]
    fn reads_init_tokens() {
        let frame: RawFrame = serde_json::from_str(
            r#"{"type":"connection_init","payload":{"Authorization":"Bearer abc"}}"#,
        )
        .unwrap();
        assert_eq!(frame.init_token(), "abc");

        let bare: RawFrame =
            serde_json::from_str(r#"{"type":"connection_init","payload":{"authorization":"xyz"}}"#)
                .unwrap();
        assert_eq!(bare.init_token(), "xyz");

        let empty: RawFrame = serde_json::from_str(r#"{"type":"connection_init"}"#).unwrap();
        assert_eq!(empty.init_token(), "");
    }

    #[test]
    fn frames_omit_empty_fields() {
        let ack = serde_json::to_value(ServerFrame::connection_ack()).unwrap();
        assert_eq!(ack, json!({"type": "connection_ack"}));
        let next = serde_json::to_value(ServerFrame::next("1", json!({"data": 1}))).unwrap();
        assert_eq!(next, json!({"id": "1", "type": "next", "payload": {"data": 1}}));
    }
}
