use salvager_core::{Result, SalvagerError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod env_substitution;

pub use env_substitution::substitute_env_vars;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub rest: RestSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Remote MCP endpoint and handshake identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_mcp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestSettings {
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_session_key")]
    pub default_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub policy: TransportPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Which transports the gateway facade may use, and in what order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPolicy {
    #[default]
    McpWithFallback,
    McpOnly,
    RestOnly,
}

impl GatewayConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SalvagerError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document is a valid, all-defaults configuration
        let mut raw = if yaml.trim().is_empty() {
            serde_json::json!({})
        } else {
            let value: serde_json::Value = serde_yaml::from_str(yaml)
                .map_err(|e| SalvagerError::ConfigError(format!("Failed to parse YAML: {}", e)))?;
            if value.is_null() { serde_json::json!({}) } else { value }
        };
        substitute_env_vars(&mut raw)?;

        let config: GatewayConfig = serde_json::from_value(raw)
            .map_err(|e| SalvagerError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_url("mcp.endpoint", &self.mcp.endpoint)?;
        check_url("rest.base_url", &self.rest.base_url)?;
        if self.mcp.protocol_version.is_empty() {
            return Err(SalvagerError::ConfigError("Protocol version cannot be empty".into()));
        }
        if self.pool.idle_timeout_secs == 0 || self.pool.sweep_interval_secs == 0 {
            return Err(SalvagerError::ConfigError(
                "Pool idle timeout and sweep interval must be greater than zero".into(),
            ));
        }
        if self.pool.default_key.is_empty() {
            return Err(SalvagerError::ConfigError("Default session key cannot be empty".into()));
        }
        if self.gateway.call_timeout_secs == Some(0) {
            return Err(SalvagerError::ConfigError("Call timeout must be greater than zero".into()));
        }
        Ok(())
    }

    /// The platform credential, if the environment provides a non-empty one.
    pub fn api_token(&self) -> Option<String> {
        env::var(&self.gateway.token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    pub fn default_config_path() -> PathBuf {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home_dir).join(".salvager").join("config.yaml")
    }
}

impl PoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl GatewaySettings {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            endpoint: default_mcp_endpoint(),
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_key: default_session_key(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            policy: TransportPolicy::default(),
            call_timeout_secs: None,
            token_env: default_token_env(),
        }
    }
}

fn check_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(SalvagerError::ConfigError(format!(
            "{} must start with http:// or https:// (got '{}')",
            field, url
        )))
    }
}

fn default_mcp_endpoint() -> String { "https://mcp.apify.com".to_string() }
fn default_protocol_version() -> String { "2024-11-05".to_string() }
fn default_client_name() -> String { "salvager".to_string() }
fn default_client_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_rest_base_url() -> String { "https://api.apify.com/v2".to_string() }
fn default_idle_timeout_secs() -> u64 { 30 * 60 }
fn default_sweep_interval_secs() -> u64 { 5 * 60 }
fn default_session_key() -> String { "default".to_string() }
fn default_token_env() -> String { "RESOURCE_GATEWAY_TOKEN".to_string() }
