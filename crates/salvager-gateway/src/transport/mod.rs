//! The two ways of reaching the platform behind one capability.

use async_trait::async_trait;
use salvager_core::{GatheringTask, Page, ResourceType, Result};
use serde_json::Value;

mod mcp;
mod rest;

pub use mcp::McpTransport;
pub use rest::RestTransport;

/// Platform operations the gateway facade needs, independent of the wire protocol.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn discover_resources(&self, query: &str, limit: usize) -> Result<Vec<ResourceType>>;

    async fn get_resource_details(&self, actor_id: &str) -> Result<ResourceType>;

    async fn start_gathering(&self, actor_id: &str, input: Value) -> Result<GatheringTask>;

    async fn get_task_status(&self, run_id: &str) -> Result<GatheringTask>;

    async fn get_task_output(&self, dataset_id: &str, page: Page) -> Result<Vec<Value>>;

    async fn get_task_logs(&self, run_id: &str) -> Result<String>;

    async fn list_stored_resources(&self) -> Result<Vec<Value>>;

    async fn get_stored_resource(&self, dataset_id: &str) -> Result<Value>;
}
