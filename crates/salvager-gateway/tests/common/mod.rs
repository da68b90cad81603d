//! Mock platform endpoints for the gateway integration tests

#![allow(dead_code)]

use salvager_config::McpSettings;
use salvager_gateway::{McpTransport, RestTransport};
use salvager_mcp::{PoolOptions, SessionPool};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "apify_api_test";

pub fn tool_text(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": { "content": [ { "type": "text", "text": text } ] }
    }))
}

pub fn tool_json(value: Value) -> ResponseTemplate {
    tool_text(&value.to_string())
}

/// MCP endpoint at `/mcp` that completes the handshake with session `sess-1`.
pub async fn mount_mcp_handshake(server: &MockServer, expected_initializations: u64) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": "initialize" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": {} }))
                .insert_header("Mcp-Session-Id", "sess-1"),
        )
        .expect(expected_initializations)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({ "method": "tools/list" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": { "tools": [ { "name": "search-actors" }, { "name": "call-actor" } ] }
        })))
        .mount(server)
        .await;
}

/// Match a `tools/call` of `tool` whose arguments contain `arguments`.
pub fn tool_call(tool: &str, arguments: Value) -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments }
        })))
}

pub fn mcp_settings(server: &MockServer) -> McpSettings {
    McpSettings {
        endpoint: format!("{}/mcp", server.uri()),
        ..McpSettings::default()
    }
}

pub fn mcp_transport(server: &MockServer) -> (Arc<SessionPool>, McpTransport) {
    let pool = Arc::new(SessionPool::new(mcp_settings(server), PoolOptions::default()));
    let transport = McpTransport::new(pool.clone(), TOKEN, "default");
    (pool, transport)
}

pub fn rest_transport(server: &MockServer) -> RestTransport {
    RestTransport::new(&format!("{}/v2", server.uri()), TOKEN).unwrap()
}
