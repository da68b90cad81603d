use async_trait::async_trait;
use salvager_core::{GatheringTask, Page, ResourceType, Result, SalvagerError};
use salvager_mcp::{FailureKind, McpTool, PooledSession, SessionPool, ToolInvocationResult, ToolPayload};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ResourceTransport;
use crate::normalize;

/// Platform access through pooled MCP sessions.
///
/// Every call checks out the session for `session_key`, so calls through one
/// transport are serialized. A transport-class failure closes the pooled
/// session and the next call starts a fresh handshake.
pub struct McpTransport {
    pool: Arc<SessionPool>,
    token: String,
    session_key: String,
    call_timeout: Option<Duration>,
}

impl McpTransport {
    pub fn new(pool: Arc<SessionPool>, token: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            pool,
            token: token.into(),
            session_key: session_key.into(),
            call_timeout: None,
        }
    }

    /// Bound each tool call. Expiry stops the wait only; the remote run is not
    /// cancelled and may still complete, so a retry can start a second run.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut session = self.pool.get_session(&self.session_key, &self.token).await?;
        match session.list_tools().await {
            Ok(tools) => Ok(tools),
            Err(e) => {
                if e.is_transport() {
                    session.discard();
                }
                Err(e)
            }
        }
    }

    /// Invoke a tool and report the outcome as a value.
    ///
    /// The timeout covers waiting for the session as well as the call. A call
    /// abandoned after checkout closes its own session on the way out; a call
    /// that never got the session leaves the pool untouched.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolInvocationResult> {
        let call = self.call_pooled(tool, arguments);
        let Some(limit) = self.call_timeout else {
            return call.await;
        };

        match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("MCP tool '{}' timed out after {:?}; the remote call may still complete", tool, limit);
                Err(SalvagerError::TransportError(format!(
                    "Tool '{}' did not answer within {:?}",
                    tool, limit
                )))
            }
        }
    }

    async fn call_pooled(&self, tool: &str, arguments: Value) -> Result<ToolInvocationResult> {
        let mut session = self.pool.get_session(&self.session_key, &self.token).await?;
        let mut in_flight = InFlight::new(&mut session);
        let outcome = in_flight.session.call_tool(tool, arguments).await;
        in_flight.finish();
        let result = outcome?;

        if matches!(
            result.failure_kind(),
            Some(FailureKind::Transport | FailureKind::SessionClosed)
        ) {
            warn!("Evicting MCP session '{}' after failed call to '{}'", self.session_key, tool);
            session.discard();
        }
        Ok(result)
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<ToolPayload> {
        self.call_tool(tool, arguments).await?.into_result()
    }

    async fn invoke_json(&self, tool: &str, arguments: Value) -> Result<Value> {
        match self.invoke(tool, arguments).await? {
            ToolPayload::Text(text) => Err(SalvagerError::ProtocolError(format!(
                "Tool '{}' returned text where JSON was expected: {}",
                tool,
                truncate(&text, 200)
            ))),
            payload => Ok(normalize::unwrap_data(payload.into_value())),
        }
    }

    async fn invoke_list(&self, tool: &str, arguments: Value) -> Result<Vec<Value>> {
        let value = self.invoke_json(tool, arguments).await?;
        normalize::items(value).ok_or_else(|| {
            SalvagerError::ProtocolError(format!("Tool '{}' did not return a list", tool))
        })
    }
}

#[async_trait]
impl ResourceTransport for McpTransport {
    fn name(&self) -> &'static str {
        "mcp"
    }

    async fn discover_resources(&self, query: &str, limit: usize) -> Result<Vec<ResourceType>> {
        let actors = self
            .invoke_list("search-actors", json!({ "search": query, "limit": limit }))
            .await?;
        debug!("search-actors returned {} actors", actors.len());
        Ok(actors.iter().map(normalize::resource_from_actor).collect())
    }

    async fn get_resource_details(&self, actor_id: &str) -> Result<ResourceType> {
        let actor = self
            .invoke_json("fetch-actor-details", json!({ "actorId": actor_id }))
            .await?;
        Ok(normalize::resource_details(actor_id, &actor, None))
    }

    async fn start_gathering(&self, actor_id: &str, input: Value) -> Result<GatheringTask> {
        let run = self
            .invoke_json("call-actor", json!({ "actorId": actor_id, "input": input }))
            .await?;
        normalize::task_from_run(&run)
    }

    async fn get_task_status(&self, run_id: &str) -> Result<GatheringTask> {
        let run = self.invoke_json("get-actor-run", json!({ "runId": run_id })).await?;
        normalize::task_from_run(&run)
    }

    async fn get_task_output(&self, dataset_id: &str, page: Page) -> Result<Vec<Value>> {
        self.invoke_list(
            "get-actor-output",
            json!({ "datasetId": dataset_id, "limit": page.limit, "offset": page.offset }),
        )
        .await
    }

    async fn get_task_logs(&self, run_id: &str) -> Result<String> {
        match self.invoke("get-actor-log", json!({ "runId": run_id })).await? {
            ToolPayload::Text(text) => Ok(text),
            ToolPayload::Json(Value::String(text)) => Ok(text),
            other => Ok(other.into_value().to_string()),
        }
    }

    async fn list_stored_resources(&self) -> Result<Vec<Value>> {
        self.invoke_list("get-dataset-list", json!({})).await
    }

    async fn get_stored_resource(&self, dataset_id: &str) -> Result<Value> {
        self.invoke_json("get-dataset", json!({ "datasetId": dataset_id })).await
    }
}

/// Closes the checked-out session if the call is dropped before it finishes.
///
/// An abandoned request may have left the session mid-exchange.
struct InFlight<'a> {
    session: &'a mut PooledSession,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a mut PooledSession) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Closing MCP session '{}' after an abandoned call", self.session.key());
            self.session.close();
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
