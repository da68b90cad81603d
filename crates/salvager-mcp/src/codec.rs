//! Wire codec for the MCP HTTP transport
//!
//! Responses arrive either as one JSON document or as a `text/event-stream`
//! body holding one or more `data:` frames. Only the last parseable frame is
//! authoritative. The session id can be carried in three places, checked in
//! the order given by [`SESSION_ID_SOURCES`].

use salvager_core::{Result, SalvagerError};
use serde::Serialize;
use serde_json::Value;

use crate::types::{JsonRpcRequest, JsonRpcResponse, SessionId};

pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
pub const SESSION_ID_QUERY: &str = "sessionId";
pub const ACCEPT_HEADER: &str = "application/json, text/event-stream";

const SSE_DATA_PREFIX: &str = "data:";

/// Build a JSON-RPC request envelope. The caller owns id allocation.
pub fn encode_request(id: u64, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest::new(id, method, params)
}

/// A successfully decoded response body
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    /// The authoritative envelope (the only one for JSON bodies, the last frame for streams)
    pub envelope: JsonRpcResponse,

    /// Every parseable stream frame in arrival order; empty for JSON bodies
    pub frames: Vec<JsonRpcResponse>,

    /// Session id found inside the body, if any
    pub session_id: Option<SessionId>,
}

impl DecodedResponse {
    pub fn result(&self) -> Option<&Value> {
        self.envelope.result.as_ref()
    }
}

pub fn is_event_stream(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/event-stream")
}

/// Decode a response body according to its content type.
///
/// Fails with `ProtocolError` when nothing parses and with `RemoteToolError`
/// when the authoritative envelope carries a JSON-RPC `error`.
pub fn decode_response(body: &str, content_type: &str) -> Result<DecodedResponse> {
    let (envelope, frames) = if is_event_stream(content_type) {
        let frames = parse_event_stream(body);
        let last = frames.last().cloned().ok_or_else(|| {
            SalvagerError::ProtocolError("No valid JSON-RPC frame in event stream".into())
        })?;
        (last, frames)
    } else {
        let envelope: JsonRpcResponse = serde_json::from_str(body.trim()).map_err(|e| {
            SalvagerError::ProtocolError(format!("Invalid JSON-RPC body: {}", e))
        })?;
        (envelope, Vec::new())
    };

    if let Some(error) = &envelope.error {
        return Err(SalvagerError::RemoteToolError {
            code: error.code,
            message: error.message.clone(),
        });
    }

    let session_id = extract_session_id(&ResponseContext {
        header: None,
        envelope: &envelope,
        frames: &frames,
    })
    .map(|(_, id)| id);

    Ok(DecodedResponse {
        envelope,
        frames,
        session_id,
    })
}

/// Every `data:` line that parses as a JSON-RPC envelope; malformed lines are skipped.
pub fn parse_event_stream(body: &str) -> Vec<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix(SSE_DATA_PREFIX))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .collect()
}

/// Everything a session id extractor may look at for one response
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub header: Option<&'a str>,
    pub envelope: &'a JsonRpcResponse,
    pub frames: &'a [JsonRpcResponse],
}

/// Where a session id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdSource {
    /// `Mcp-Session-Id` response header
    Header,
    /// `result._meta.sessionId` of the authoritative envelope
    ResultMeta,
    /// `result._meta.sessionId` of any earlier stream frame
    StreamFrame,
}

/// Extraction order; the first hit wins.
pub const SESSION_ID_SOURCES: [SessionIdSource; 3] = [
    SessionIdSource::Header,
    SessionIdSource::ResultMeta,
    SessionIdSource::StreamFrame,
];

impl SessionIdSource {
    pub fn extract(&self, ctx: &ResponseContext<'_>) -> Option<SessionId> {
        match self {
            SessionIdSource::Header => ctx.header.and_then(SessionId::parse),
            SessionIdSource::ResultMeta => meta_session_id(ctx.envelope),
            SessionIdSource::StreamFrame => ctx.frames.iter().rev().find_map(meta_session_id),
        }
    }
}

pub fn extract_session_id(ctx: &ResponseContext<'_>) -> Option<(SessionIdSource, SessionId)> {
    SESSION_ID_SOURCES
        .iter()
        .find_map(|source| source.extract(ctx).map(|id| (*source, id)))
}

fn meta_session_id(envelope: &JsonRpcResponse) -> Option<SessionId> {
    envelope
        .result
        .as_ref()?
        .pointer("/_meta/sessionId")?
        .as_str()
        .and_then(SessionId::parse)
}

/// What a tool call actually returned once its content blocks are unwrapped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    /// The joined text content parsed as JSON
    Json(Value),
    /// The joined text content, which is not JSON
    Text(String),
    /// No text content at all; the raw result object
    Verbatim(Value),
}

impl ToolPayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ToolPayload::Json(value) | ToolPayload::Verbatim(value) => Some(value),
            ToolPayload::Text(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ToolPayload::Json(value) | ToolPayload::Verbatim(value) => value,
            ToolPayload::Text(text) => Value::String(text),
        }
    }
}

/// Concatenate the text blocks of a `tools/call` result and try one JSON parse.
pub fn extract_payload(result: &Value) -> ToolPayload {
    let texts = text_blocks(result);
    if texts.is_empty() {
        return ToolPayload::Verbatim(result.clone());
    }

    let joined = texts.join("\n");
    match serde_json::from_str::<Value>(&joined) {
        Ok(value) => ToolPayload::Json(value),
        Err(_) => ToolPayload::Text(joined),
    }
}

pub(crate) fn text_blocks(result: &Value) -> Vec<&str> {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        let decoded = decode_response(body, "application/json").unwrap();
        assert_eq!(decoded.result().unwrap()["tools"], json!([]));
        assert!(decoded.frames.is_empty());
        assert!(decoded.session_id.is_none());
    }

    #[test]
    fn event_stream_returns_last_valid_frame() {
        let body = "event: message\n\
                    data: {not json\n\
                    data: also not json }\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"ok\":true}}\n\n";

        let decoded = decode_response(body, "text/event-stream").unwrap();
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.result().unwrap()["ok"], true);
    }

    #[test]
    fn event_stream_prefers_final_frame_over_progress() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"step\":1}}\r\n\
                    data:{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"step\":2}}\r\n";

        let decoded = decode_response(body, "text/event-stream; charset=utf-8").unwrap();
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.result().unwrap()["step"], 2);
    }

    #[test]
    fn event_stream_without_frames_is_protocol_error() {
        let err = decode_response("event: ping\ndata: \n", "text/event-stream").unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn malformed_json_body_is_protocol_error() {
        let err = decode_response("<html>bad gateway</html>", "application/json").unwrap_err();
        assert!(matches!(err, SalvagerError::ProtocolError(_)));
    }

    #[test]
    fn error_envelope_is_remote_tool_error() {
        let body = r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32602,"message":"Unknown actor"}}"#;
        match decode_response(body, "application/json").unwrap_err() {
            SalvagerError::RemoteToolError { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Unknown actor");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn session_id_from_result_meta_is_returned() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"_meta":{"sessionId":"s-42"}}}"#;
        let decoded = decode_response(body, "application/json").unwrap();
        assert_eq!(decoded.session_id.unwrap().as_str(), "s-42");
    }

    #[test]
    fn extractors_run_in_order() {
        let with_meta: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": { "_meta": { "sessionId": "from-body" } }
        }))
        .unwrap();
        let early_frame: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "result": { "_meta": { "sessionId": "from-frame" } }
        }))
        .unwrap();
        let bare: JsonRpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": {} })).unwrap();

        let ctx = ResponseContext { header: Some("from-header"), envelope: &with_meta, frames: &[] };
        let (source, id) = extract_session_id(&ctx).unwrap();
        assert_eq!(source, SessionIdSource::Header);
        assert_eq!(id.as_str(), "from-header");

        let ctx = ResponseContext { header: None, envelope: &with_meta, frames: &[] };
        assert_eq!(extract_session_id(&ctx).unwrap().0, SessionIdSource::ResultMeta);

        let frames = vec![early_frame, bare.clone()];
        let ctx = ResponseContext { header: None, envelope: &bare, frames: &frames };
        let (source, id) = extract_session_id(&ctx).unwrap();
        assert_eq!(source, SessionIdSource::StreamFrame);
        assert_eq!(id.as_str(), "from-frame");

        let ctx = ResponseContext { header: Some(""), envelope: &bare, frames: &[] };
        assert!(extract_session_id(&ctx).is_none());
    }

    #[test]
    fn payload_text_is_parsed_as_json() {
        let result = json!({ "content": [ { "type": "text", "text": "{\"a\":1}" } ] });
        assert_eq!(extract_payload(&result), ToolPayload::Json(json!({ "a": 1 })));
    }

    #[test]
    fn payload_blocks_are_joined_with_newlines() {
        let result = json!({
            "content": [
                { "type": "text", "text": "[1," },
                { "type": "image", "data": "aGk=", "mimeType": "image/png" },
                { "type": "text", "text": "2]" }
            ]
        });
        assert_eq!(extract_payload(&result), ToolPayload::Json(json!([1, 2])));

        let result = json!({
            "content": [
                { "type": "text", "text": "Actor run started." },
                { "type": "text", "text": "Check back later." }
            ]
        });
        assert_eq!(
            extract_payload(&result),
            ToolPayload::Text("Actor run started.\nCheck back later.".into())
        );
    }

    #[test]
    fn payload_without_text_is_verbatim() {
        let result = json!({ "content": [], "structured": { "id": "r1" } });
        assert_eq!(extract_payload(&result), ToolPayload::Verbatim(result.clone()));
        assert_eq!(extract_payload(&result).into_value(), result);
    }
}
