use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use salvager_core::{GatheringTask, Page, ResourceType, Result, SalvagerError};
use serde_json::Value;
use tracing::debug;

use super::ResourceTransport;
use crate::normalize;

/// Platform access through the versioned REST API with bearer authorization.
pub struct RestTransport {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl RestTransport {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        Self::with_http_client(base_url, token, reqwest::Client::new())
    }

    pub fn with_http_client(base_url: &str, token: impl Into<String>, http: reqwest::Client) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            SalvagerError::ConfigError(format!("Invalid REST base URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SalvagerError::ConfigError(format!(
                "REST base URL '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    /// Base URL plus path segments; each segment is percent-encoded, so an
    /// actor id like `apify/web-scraper` stays one segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SalvagerError::TransportError(format!("REST request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SalvagerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        debug!("REST GET {}", url.path());
        let response = self.send(self.http.get(url)).await?;
        response
            .json()
            .await
            .map_err(|e| SalvagerError::ProtocolError(format!("Invalid REST response body: {}", e)))
    }

    async fn get_data(&self, url: Url) -> Result<Value> {
        Ok(normalize::unwrap_data(self.get_json(url).await?))
    }
}

#[async_trait]
impl ResourceTransport for RestTransport {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn discover_resources(&self, query: &str, limit: usize) -> Result<Vec<ResourceType>> {
        let mut url = self.url(&["store"]);
        url.query_pairs_mut()
            .append_pair("search", query)
            .append_pair("limit", &limit.to_string());

        let actors = normalize::items(self.get_json(url).await?).unwrap_or_default();
        Ok(actors.iter().map(normalize::resource_from_store_item).collect())
    }

    async fn get_resource_details(&self, actor_id: &str) -> Result<ResourceType> {
        let actor = self.get_data(self.url(&["acts", actor_id])).await?;

        // Not every actor publishes an input schema
        let schema = match self.get_json(self.url(&["acts", actor_id, "input-schema"])).await {
            Ok(schema) => Some(schema),
            Err(e) => {
                debug!("No input schema for '{}': {}", actor_id, e);
                None
            }
        };

        Ok(normalize::resource_details(actor_id, &actor, schema))
    }

    async fn start_gathering(&self, actor_id: &str, input: Value) -> Result<GatheringTask> {
        let url = self.url(&["acts", actor_id, "runs"]);
        debug!("REST POST {}", url.path());

        let response = self.send(self.http.post(url).json(&input)).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SalvagerError::ProtocolError(format!("Invalid REST response body: {}", e)))?;

        normalize::task_from_run(&normalize::unwrap_data(body))
    }

    async fn get_task_status(&self, run_id: &str) -> Result<GatheringTask> {
        let run = self.get_data(self.url(&["actor-runs", run_id])).await?;
        normalize::task_from_run(&run)
    }

    async fn get_task_output(&self, dataset_id: &str, page: Page) -> Result<Vec<Value>> {
        let mut url = self.url(&["datasets", dataset_id, "items"]);
        url.query_pairs_mut()
            .append_pair("limit", &page.limit.to_string())
            .append_pair("offset", &page.offset.to_string());

        Ok(normalize::items(self.get_json(url).await?).unwrap_or_default())
    }

    async fn get_task_logs(&self, run_id: &str) -> Result<String> {
        let response = self
            .send(self.http.get(self.url(&["actor-runs", run_id, "log"])))
            .await?;
        response
            .text()
            .await
            .map_err(|e| SalvagerError::TransportError(format!("Failed to read run log: {}", e)))
    }

    async fn list_stored_resources(&self) -> Result<Vec<Value>> {
        let body = self.get_json(self.url(&["datasets"])).await?;
        Ok(normalize::items(body).unwrap_or_default())
    }

    async fn get_stored_resource(&self, dataset_id: &str) -> Result<Value> {
        self.get_data(self.url(&["datasets", dataset_id])).await
    }
}
