use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Normalized lifecycle of a remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Map the platform's run-status vocabulary onto the four local states.
    ///
    /// Total: anything unrecognized (queued, transitional, garbage) is `Pending`.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "SUCCEEDED" => TaskStatus::Completed,
            "FAILED" | "ABORTED" | "TIMED-OUT" => TaskStatus::Failed,
            "RUNNING" => TaskStatus::Running,
            _ => TaskStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a remote actor, as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheringTask {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
}

/// A runnable remote actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceType {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Pagination window for dataset reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

#[derive(Error, Debug)]
pub enum SalvagerError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("HTTP request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("MCP handshake failed: {0}")]
    HandshakeError(String),

    #[error("Malformed response: {0}")]
    ProtocolError(String),

    #[error("Remote tool error ({code}): {message}")]
    RemoteToolError { code: i64, message: String },

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SalvagerError {
    /// Short machine-readable class, stable across message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            SalvagerError::NotConfigured(_) => "not_configured",
            SalvagerError::ConfigError(_) => "config",
            SalvagerError::TransportError(_) | SalvagerError::HttpStatus { .. } => "transport",
            SalvagerError::HandshakeError(_) => "handshake",
            SalvagerError::ProtocolError(_) | SalvagerError::SerializationError(_) => "protocol",
            SalvagerError::RemoteToolError { .. } => "remote_tool",
            SalvagerError::SessionClosed(_) => "session_closed",
            SalvagerError::IoError(_) => "io",
        }
    }

    /// Failures of the wire itself, after which a pooled session should not be trusted.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SalvagerError::TransportError(_)
                | SalvagerError::HttpStatus { .. }
                | SalvagerError::SessionClosed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SalvagerError>;
