//! MCP session client over plain HTTP POST
//!
//! One client owns one logical session: `Uninitialized -> Initializing -> Ready`,
//! and `Ready -> Closed` on [`McpSessionClient::close`]. A closed client never
//! re-initializes; the pool builds a fresh one instead.
//!
//! There is no per-call timeout and no cancellation. Dropping a pending
//! `call_tool` future stops the wait, but the remote tool may still run to
//! completion, so retrying a call is not idempotent.

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use salvager_config::McpSettings;
use salvager_core::{Result, SalvagerError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{
    self, DecodedResponse, ResponseContext, SessionIdSource, ACCEPT_HEADER, SESSION_ID_HEADER,
    SESSION_ID_QUERY,
};
use crate::invocation::ToolInvocationResult;
use crate::types::{
    ClientCapabilities, ClientInfo, InitializeParams, JsonRpcNotification, ListToolsResult,
    McpTool, SessionId, SessionState, ToolCallParams,
};

/// Raw HTTP exchange before any JSON-RPC decoding
struct RawResponse {
    content_type: String,
    session_header: Option<String>,
    body: String,
}

pub struct McpSessionClient {
    /// Local identity, for logs only
    instance: Uuid,

    endpoint: String,
    token: String,
    protocol_version: String,
    client_info: ClientInfo,
    http: reqwest::Client,

    state: SessionState,
    session_id: Option<SessionId>,

    /// Outbound message ids; never reset for the lifetime of the client
    request_id: AtomicU64,

    tools_cache: Vec<McpTool>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for McpSessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSessionClient")
            .field("instance", &self.instance)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl McpSessionClient {
    pub fn new(settings: &McpSettings, token: impl Into<String>) -> Self {
        Self::with_http_client(settings, token, reqwest::Client::new())
    }

    pub fn with_http_client(
        settings: &McpSettings,
        token: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            instance: Uuid::new_v4(),
            endpoint: settings.endpoint.clone(),
            token: token.into(),
            protocol_version: settings.protocol_version.clone(),
            client_info: ClientInfo {
                name: settings.client_name.clone(),
                version: settings.client_version.clone(),
            },
            http,
            state: SessionState::Uninitialized,
            session_id: None,
            request_id: AtomicU64::new(1),
            tools_cache: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the three-step handshake. A no-op returning the cached catalogue when already ready.
    pub async fn initialize(&mut self) -> Result<Vec<McpTool>> {
        match self.state {
            SessionState::Ready => return Ok(self.tools_cache.clone()),
            SessionState::Closed => return Err(closed_error(self.instance)),
            SessionState::Uninitialized | SessionState::Initializing => {}
        }

        info!("Initializing MCP session {} against {}", self.instance, self.endpoint);
        // An interrupted earlier attempt may have adopted an id already
        self.session_id = None;
        self.tools_cache.clear();
        self.state = SessionState::Initializing;

        match self.handshake().await {
            Ok(tools) => {
                self.state = SessionState::Ready;
                info!(
                    "MCP session {} ready ({} tools, session id {})",
                    self.instance,
                    tools.len(),
                    self.session_id.as_ref().map(SessionId::as_str).unwrap_or("-")
                );
                Ok(tools)
            }
            Err(e) => {
                // Back to a clean slate so a retry starts from scratch
                self.session_id = None;
                self.tools_cache.clear();
                self.state = SessionState::Uninitialized;
                warn!("MCP handshake failed for session {}: {}", self.instance, e);
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<Vec<McpTool>> {
        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };

        let response = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await
            .map_err(|e| match e {
                SalvagerError::RemoteToolError { message, .. } => {
                    SalvagerError::HandshakeError(format!("initialize rejected: {}", message))
                }
                other => other,
            })?;

        if let Some(server) = response.result().and_then(|r| r.get("serverInfo")) {
            debug!("Connected to MCP server: {}", server);
        }

        if self.session_id.is_none() {
            return Err(SalvagerError::HandshakeError(
                "No session id in response header, result metadata or event stream".into(),
            ));
        }

        self.notify("notifications/initialized").await?;
        self.fetch_tools().await
    }

    /// List the remote tool catalogue, initializing first if needed.
    pub async fn list_tools(&mut self) -> Result<Vec<McpTool>> {
        match self.state {
            SessionState::Ready => self.fetch_tools().await,
            SessionState::Closed => Err(closed_error(self.instance)),
            // The handshake has just fetched the catalogue
            SessionState::Uninitialized | SessionState::Initializing => self.initialize().await,
        }
    }

    async fn fetch_tools(&mut self) -> Result<Vec<McpTool>> {
        let response = self.request("tools/list", Some(json!({}))).await?;

        let listed: ListToolsResult = match response.envelope.result {
            Some(result) => serde_json::from_value(result).map_err(|e| {
                SalvagerError::ProtocolError(format!("Unexpected tools/list result: {}", e))
            })?,
            None => ListToolsResult::default(),
        };

        debug!("Discovered {} tools on session {}", listed.tools.len(), self.instance);
        self.tools_cache = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Call a remote tool.
    ///
    /// Only an implicit handshake can fail this with `Err`; transport, protocol
    /// and remote errors of the call itself come back as a failed result.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolInvocationResult> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Closed => {
                return Ok(ToolInvocationResult::failure(
                    name,
                    &closed_error(self.instance),
                    Duration::ZERO,
                ));
            }
            SessionState::Uninitialized | SessionState::Initializing => {
                self.initialize().await?;
            }
        }

        debug!("Calling MCP tool '{}' on session {}", name, self.instance);
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };

        let started = Instant::now();
        let outcome = match serde_json::to_value(params) {
            Ok(params) => self.request("tools/call", Some(params)).await,
            Err(e) => Err(e.into()),
        };
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(response) => ToolInvocationResult::from_result(
                name,
                response.envelope.result.unwrap_or(Value::Null),
                elapsed,
            ),
            Err(e) => {
                warn!("MCP tool '{}' failed ({}): {}", name, e.kind(), e);
                ToolInvocationResult::failure(name, &e, elapsed)
            }
        };

        debug!(
            "MCP tool '{}' finished in {}ms (success: {})",
            name,
            elapsed.as_millis(),
            result.success
        );
        Ok(result)
    }

    /// Send a request and decode its response, adopting any session id it carries.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<DecodedResponse> {
        let request = codec::encode_request(self.next_request_id(), method, params);
        debug!("Sending MCP request {} ({})", request.id, method);

        let raw = self.post(serde_json::to_string(&request)?).await?;

        let decoded = match codec::decode_response(&raw.body, &raw.content_type) {
            Ok(decoded) => decoded,
            Err(e) => {
                if let Some(id) = raw.session_header.as_deref().and_then(SessionId::parse) {
                    self.adopt_session_id(id, SessionIdSource::Header);
                }
                return Err(e);
            }
        };

        let ctx = ResponseContext {
            header: raw.session_header.as_deref(),
            envelope: &decoded.envelope,
            frames: &decoded.frames,
        };
        if let Some((source, id)) = codec::extract_session_id(&ctx) {
            self.adopt_session_id(id, source);
        }

        Ok(decoded)
    }

    /// Send a notification; the response body is ignored.
    async fn notify(&mut self, method: &str) -> Result<()> {
        let notification = JsonRpcNotification::new(method, Some(json!({})));
        let raw = self.post(serde_json::to_string(&notification)?).await?;

        if let Some(id) = raw.session_header.as_deref().and_then(SessionId::parse) {
            self.adopt_session_id(id, SessionIdSource::Header);
        }
        Ok(())
    }

    async fn post(&self, body: String) -> Result<RawResponse> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            SalvagerError::ConfigError(format!("Invalid MCP endpoint '{}': {}", self.endpoint, e))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", &self.token);
            if let Some(id) = &self.session_id {
                query.append_pair(SESSION_ID_QUERY, id.as_str());
            }
        }

        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_HEADER);
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, id.as_str());
        }

        let response = request.body(body).send().await.map_err(|e| {
            // The URL carries the token; keep it out of error messages
            SalvagerError::TransportError(format!(
                "POST {} failed: {}",
                self.endpoint,
                e.without_url()
            ))
        })?;

        let status = response.status();
        let header_text = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_text(CONTENT_TYPE.as_str()).unwrap_or_default();
        let session_header = header_text(SESSION_ID_HEADER);

        let body = response.text().await.map_err(|e| {
            SalvagerError::TransportError(format!("Failed to read MCP response: {}", e.without_url()))
        })?;

        if !status.is_success() {
            return Err(SalvagerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(RawResponse {
            content_type,
            session_header,
            body,
        })
    }

    fn adopt_session_id(&mut self, id: SessionId, source: SessionIdSource) {
        if self.session_id.as_ref() != Some(&id) {
            debug!("Session {} adopted id {} from {:?}", self.instance, id, source);
            self.session_id = Some(id);
        }
    }

    /// Drop the session locally. The remote side is not notified.
    pub fn close(&mut self) {
        debug!("Closing MCP session {}", self.instance);
        self.session_id = None;
        self.tools_cache.clear();
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Cached catalogue from the last successful `tools/list`
    pub fn tools(&self) -> &[McpTool] {
        &self.tools_cache
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn uses_token(&self, token: &str) -> bool {
        self.token == token
    }
}

fn closed_error(instance: Uuid) -> SalvagerError {
    SalvagerError::SessionClosed(format!("MCP session {} has been closed", instance))
}

impl Drop for McpSessionClient {
    fn drop(&mut self) {
        debug!("Dropping MCP session client: {}", self.instance);
    }
}
