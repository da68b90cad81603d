//! Normalized outcome of a single `tools/call`

use salvager_core::{Result, SalvagerError};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

use crate::codec::{self, ToolPayload};

/// Failure class of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Protocol,
    RemoteTool,
    SessionClosed,
}

impl FailureKind {
    pub fn of(error: &SalvagerError) -> Self {
        match error {
            SalvagerError::RemoteToolError { .. } => FailureKind::RemoteTool,
            SalvagerError::ProtocolError(_) | SalvagerError::SerializationError(_) => {
                FailureKind::Protocol
            }
            SalvagerError::SessionClosed(_) => FailureKind::SessionClosed,
            _ => FailureKind::Transport,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// Result of one tool call. Failures are values here, not errors, so that a
/// sequence of calls can inspect a partial failure and carry on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    pub success: bool,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ToolPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl ToolInvocationResult {
    /// Interpret the `result` member of a successful `tools/call` response.
    pub fn from_result(tool: &str, result: Value, elapsed: Duration) -> Self {
        let flagged = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
        if flagged {
            let text = codec::text_blocks(&result).join("\n");
            let message = if text.is_empty() {
                format!("Tool '{}' reported an error", tool)
            } else {
                text
            };
            return Self {
                success: false,
                tool: tool.to_string(),
                payload: None,
                error: Some(ToolFailure { kind: FailureKind::RemoteTool, message, code: None }),
                elapsed,
            };
        }

        Self {
            success: true,
            tool: tool.to_string(),
            payload: Some(codec::extract_payload(&result)),
            error: None,
            elapsed,
        }
    }

    pub fn failure(tool: &str, error: &SalvagerError, elapsed: Duration) -> Self {
        let code = match error {
            SalvagerError::RemoteToolError { code, .. } => Some(*code),
            _ => None,
        };
        let message = match error {
            SalvagerError::RemoteToolError { message, .. } => message.clone(),
            other => other.to_string(),
        };

        Self {
            success: false,
            tool: tool.to_string(),
            payload: None,
            error: Some(ToolFailure { kind: FailureKind::of(error), message, code }),
            elapsed,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Turn a failed result back into a typed error, for callers that want `?`.
    pub fn into_result(self) -> Result<ToolPayload> {
        match (self.payload, self.error) {
            (Some(payload), None) => Ok(payload),
            (_, Some(failure)) => Err(match failure.kind {
                FailureKind::Transport => SalvagerError::TransportError(failure.message),
                FailureKind::Protocol => SalvagerError::ProtocolError(failure.message),
                FailureKind::SessionClosed => SalvagerError::SessionClosed(failure.message),
                FailureKind::RemoteTool => SalvagerError::RemoteToolError {
                    code: failure.code.unwrap_or_default(),
                    message: failure.message,
                },
            }),
            (None, None) => Err(SalvagerError::ProtocolError(format!(
                "Tool '{}' returned no payload",
                self.tool
            ))),
        }
    }
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}
