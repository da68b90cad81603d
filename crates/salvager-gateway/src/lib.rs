//! Stable, transport-agnostic access to the data-extraction platform.
//!
//! [`ResourceGateway`] tries its primary transport and, on any error, logs the
//! cause and repeats the same operation on the fallback. Under the default
//! policy the primary is the MCP session pool and the fallback is REST, which
//! trades transport consistency for availability: one logical operation may be
//! served by either path.
//!
//! An optional per-call timeout bounds the MCP path only. When it fires the
//! remote tool keeps running, so retrying `start_gathering` may start a second
//! run; callers own the idempotency of retries.

use salvager_config::{GatewayConfig, TransportPolicy};
use salvager_core::{GatheringTask, Page, ResourceType, Result, SalvagerError, TaskStatus};
use salvager_mcp::{McpTool, SessionPool, ToolInvocationResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub mod normalize;
pub mod transport;

pub use transport::{McpTransport, ResourceTransport, RestTransport};

pub const BROWSER_ACTOR: &str = "apify/rag-web-browser";
pub const DEFAULT_BROWSE_RESULTS: usize = 10;

/// Output of a run, once the run allows it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutput {
    /// The run has not completed; no items were fetched
    NotReady(GatheringTask),
    Ready { task: GatheringTask, items: Vec<Value> },
}

pub struct ResourceGateway {
    primary: Option<Arc<dyn ResourceTransport>>,
    fallback: Option<Arc<dyn ResourceTransport>>,
    mcp: Option<Arc<McpTransport>>,
    pool: Option<Arc<SessionPool>>,
    policy: TransportPolicy,
}

impl ResourceGateway {
    /// Build the gateway described by `config`.
    ///
    /// Without a credential in the environment the gateway is unconfigured and
    /// every operation fails with `NotConfigured` before touching the network.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let Some(token) = config.api_token() else {
            warn!(
                "No platform token in ${}; gateway is not configured",
                config.gateway.token_env
            );
            return Ok(Self::unconfigured());
        };
        Self::with_token(config, token)
    }

    pub fn with_token(config: &GatewayConfig, token: String) -> Result<Self> {
        let policy = config.gateway.policy;

        let (pool, mcp) = match policy {
            TransportPolicy::RestOnly => (None, None),
            TransportPolicy::McpWithFallback | TransportPolicy::McpOnly => {
                let pool = Arc::new(SessionPool::from_config(config));
                let mcp = McpTransport::new(pool.clone(), token.clone(), config.pool.default_key.clone())
                    .with_call_timeout(config.gateway.call_timeout());
                (Some(pool), Some(Arc::new(mcp)))
            }
        };

        let rest = match policy {
            TransportPolicy::McpOnly => None,
            TransportPolicy::McpWithFallback | TransportPolicy::RestOnly => {
                Some(Arc::new(RestTransport::new(&config.rest.base_url, token)?))
            }
        };

        let (primary, fallback): (Option<Arc<dyn ResourceTransport>>, Option<Arc<dyn ResourceTransport>>) =
            match policy {
                TransportPolicy::McpWithFallback => (
                    mcp.clone().map(|m| m as Arc<dyn ResourceTransport>),
                    rest.map(|r| r as Arc<dyn ResourceTransport>),
                ),
                TransportPolicy::McpOnly => (mcp.clone().map(|m| m as Arc<dyn ResourceTransport>), None),
                TransportPolicy::RestOnly => (rest.map(|r| r as Arc<dyn ResourceTransport>), None),
            };

        info!("Resource gateway configured with policy {:?}", policy);
        Ok(Self {
            primary,
            fallback,
            mcp,
            pool,
            policy,
        })
    }

    pub fn unconfigured() -> Self {
        Self {
            primary: None,
            fallback: None,
            mcp: None,
            pool: None,
            policy: TransportPolicy::default(),
        }
    }

    /// Assemble a gateway from explicit transports.
    pub fn with_transports(
        primary: Arc<dyn ResourceTransport>,
        fallback: Option<Arc<dyn ResourceTransport>>,
    ) -> Self {
        let policy = if fallback.is_some() {
            TransportPolicy::McpWithFallback
        } else {
            TransportPolicy::McpOnly
        };
        Self {
            primary: Some(primary),
            fallback,
            mcp: None,
            pool: None,
            policy,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.primary.is_some()
    }

    pub fn policy(&self) -> TransportPolicy {
        self.policy
    }

    /// Start the idle-session reaper. Must run inside a Tokio runtime.
    pub fn start(&self) {
        if let Some(pool) = &self.pool {
            pool.start();
        }
    }

    /// Stop the reaper and close every pooled session.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }

    pub fn session_pool(&self) -> Option<&Arc<SessionPool>> {
        self.pool.as_ref()
    }

    /// Run `call` on the primary transport, then on the fallback if the primary fails.
    async fn dispatch<'a, T, F, Fut>(&'a self, operation: &str, call: F) -> Result<T>
    where
        F: Fn(&'a dyn ResourceTransport) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let primary = self.primary.as_deref().ok_or_else(not_configured)?;

        let err = match call(primary).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback.as_deref() else {
            return Err(err);
        };

        warn!(
            "{} via {} failed ({}): {}; falling back to {}",
            operation,
            primary.name(),
            err.kind(),
            err,
            fallback.name()
        );
        call(fallback).await.inspect_err(|e| {
            error!("{} via {} failed as well: {}", operation, fallback.name(), e);
        })
    }

    #[instrument(skip(self))]
    pub async fn discover_resources(&self, query: &str, limit: usize) -> Result<Vec<ResourceType>> {
        self.dispatch("discover_resources", |t| t.discover_resources(query, limit))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_resource_details(&self, actor_id: &str) -> Result<ResourceType> {
        self.dispatch("get_resource_details", |t| t.get_resource_details(actor_id))
            .await
    }

    #[instrument(skip(self, input))]
    pub async fn start_gathering(&self, actor_id: &str, input: Value) -> Result<GatheringTask> {
        let task = self
            .dispatch("start_gathering", |t| t.start_gathering(actor_id, input.clone()))
            .await?;
        info!("Started run {} of {} ({})", task.id, actor_id, task.status);
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn get_task_status(&self, run_id: &str) -> Result<GatheringTask> {
        self.dispatch("get_task_status", |t| t.get_task_status(run_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_task_output(&self, dataset_id: &str, page: Page) -> Result<Vec<Value>> {
        self.dispatch("get_task_output", |t| t.get_task_output(dataset_id, page))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_task_logs(&self, run_id: &str) -> Result<String> {
        self.dispatch("get_task_logs", |t| t.get_task_logs(run_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_stored_resources(&self) -> Result<Vec<Value>> {
        self.dispatch("list_stored_resources", |t| t.list_stored_resources())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_stored_resource(&self, dataset_id: &str) -> Result<Value> {
        self.dispatch("get_stored_resource", |t| t.get_stored_resource(dataset_id))
            .await
    }

    /// Start the RAG web browser actor for `query`.
    pub async fn browse_and_gather(&self, query: &str, max_results: Option<usize>) -> Result<GatheringTask> {
        let max_results = max_results.unwrap_or(DEFAULT_BROWSE_RESULTS);
        self.start_gathering(BROWSER_ACTOR, json!({ "query": query, "maxResults": max_results }))
            .await
    }

    /// Items of a run's dataset, or the run itself while it has not completed.
    #[instrument(skip(self))]
    pub async fn collect_run_output(&self, run_id: &str, page: Page) -> Result<RunOutput> {
        let task = self.get_task_status(run_id).await?;
        if task.status != TaskStatus::Completed {
            debug!("Run {} is {}; not fetching output", run_id, task.status);
            return Ok(RunOutput::NotReady(task));
        }

        let dataset_id = task.dataset_id.clone().unwrap_or_else(|| task.id.clone());
        let items = self.get_task_output(&dataset_id, page).await?;
        Ok(RunOutput::Ready { task, items })
    }

    /// The MCP tool catalogue. No REST equivalent exists.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.mcp_transport()?.list_tools().await
    }

    /// Invoke an MCP tool directly. Tool-level failures come back inside the result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolInvocationResult> {
        self.mcp_transport()?.call_tool(name, arguments).await
    }

    fn mcp_transport(&self) -> Result<&McpTransport> {
        if !self.is_configured() {
            return Err(not_configured());
        }
        self.mcp.as_deref().ok_or_else(|| {
            SalvagerError::NotConfigured(format!(
                "MCP transport is disabled by the {:?} policy",
                self.policy
            ))
        })
    }
}

fn not_configured() -> SalvagerError {
    SalvagerError::NotConfigured("no platform API token is set".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(policy: TransportPolicy) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.gateway.policy = policy;
        config
    }

    #[tokio::test]
    async fn unconfigured_gateway_refuses_every_operation() {
        let gateway = ResourceGateway::unconfigured();
        assert!(!gateway.is_configured());

        let err = gateway.discover_resources("maps", 5).await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
        let err = gateway.list_tools().await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
        let err = gateway.browse_and_gather("rust", None).await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
    }

    #[test]
    fn missing_token_means_unconfigured() {
        let mut config = config(TransportPolicy::McpWithFallback);
        config.gateway.token_env = "SALVAGER_GATEWAY_TEST_ABSENT_TOKEN".to_string();
        std::env::remove_var("SALVAGER_GATEWAY_TEST_ABSENT_TOKEN");

        let gateway = ResourceGateway::from_config(&config).unwrap();
        assert!(!gateway.is_configured());
    }

    #[test]
    fn policy_selects_transports() {
        let both = ResourceGateway::with_token(&config(TransportPolicy::McpWithFallback), "t".into()).unwrap();
        assert_eq!(both.primary.as_ref().unwrap().name(), "mcp");
        assert_eq!(both.fallback.as_ref().unwrap().name(), "rest");
        assert!(both.session_pool().is_some());

        let mcp_only = ResourceGateway::with_token(&config(TransportPolicy::McpOnly), "t".into()).unwrap();
        assert_eq!(mcp_only.primary.as_ref().unwrap().name(), "mcp");
        assert!(mcp_only.fallback.is_none());

        let rest_only = ResourceGateway::with_token(&config(TransportPolicy::RestOnly), "t".into()).unwrap();
        assert_eq!(rest_only.primary.as_ref().unwrap().name(), "rest");
        assert!(rest_only.fallback.is_none());
        assert!(rest_only.session_pool().is_none());
    }

    #[tokio::test]
    async fn rest_only_has_no_tool_surface() {
        let gateway = ResourceGateway::with_token(&config(TransportPolicy::RestOnly), "t".into()).unwrap();
        let err = gateway.call_tool("search-actors", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
        assert!(err.to_string().contains("RestOnly"));
    }

    #[test]
    fn run_output_serializes_with_state_tag() {
        let task = GatheringTask {
            id: "r1".into(),
            status: TaskStatus::Running,
            created_at: chrono::Utc::now(),
            completed_at: None,
            dataset_id: None,
        };
        let json = serde_json::to_value(RunOutput::NotReady(task)).unwrap();
        assert_eq!(json["state"], "not_ready");
        assert_eq!(json["status"], "running");
    }
}
