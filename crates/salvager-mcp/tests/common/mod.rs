//! Mock MCP server shared by the integration tests

#![allow(dead_code)]

use salvager_config::McpSettings;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const TOKEN: &str = "apify_api_test";

/// Matches on the JSON-RPC `method` field of the request body
pub struct JsonRpcMethod(pub String);

impl Match for JsonRpcMethod {
    fn matches(&self, request: &Request) -> bool {
        serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| body.get("method").and_then(Value::as_str).map(str::to_string))
            .is_some_and(|m| m == self.0)
    }
}

pub fn rpc(method_name: &str) -> JsonRpcMethod {
    JsonRpcMethod(method_name.to_string())
}

pub fn json_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

pub fn event_stream(frames: &[Value]) -> ResponseTemplate {
    let body: String = frames
        .iter()
        .map(|frame| format!("event: message\ndata: {}\n\n", frame))
        .collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// `tools/call` result holding a single text block
pub fn text_content(text: &str) -> Value {
    json!({ "content": [ { "type": "text", "text": text } ] })
}

pub fn catalogue() -> Value {
    json!({
        "tools": [
            { "name": "search-actors", "description": "Search the store", "inputSchema": { "type": "object" } },
            { "name": "call-actor", "description": "Run an actor" }
        ]
    })
}

pub struct MockMcpServer {
    pub server: MockServer,
}

impl MockMcpServer {
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    pub fn settings(&self) -> McpSettings {
        McpSettings {
            endpoint: format!("{}/mcp", self.server.uri()),
            ..McpSettings::default()
        }
    }

    /// Full handshake: `initialize` assigns `session_id` through the response header.
    pub async fn mount_handshake(&self, session_id: &str, expected_initializations: u64) {
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(rpc("initialize"))
            .respond_with(
                json_result(json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": { "name": "mock-apify", "version": "1.0.0" }
                }))
                .insert_header("Mcp-Session-Id", session_id),
            )
            .expect(expected_initializations)
            .mount(&self.server)
            .await;

        self.mount_session_methods().await;
    }

    /// `notifications/initialized` and `tools/list`, for any session
    pub async fn mount_session_methods(&self) {
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(rpc("notifications/initialized"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(rpc("tools/list"))
            .respond_with(json_result(catalogue()))
            .mount(&self.server)
            .await;
    }

    pub async fn requests_for(&self, method_name: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| rpc(method_name).matches(request))
            .collect()
    }
}
