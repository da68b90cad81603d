//! Stateful MCP sessions over HTTP POST
//!
//! [`McpSessionClient`] runs the `initialize` / `notifications/initialized` /
//! `tools/list` handshake and invokes tools on one server-assigned session.
//! [`SessionPool`] keeps one such session per key and reaps idle ones.

pub mod client;
pub mod codec;
pub mod invocation;
pub mod pool;
pub mod types;

pub use client::McpSessionClient;
pub use codec::{extract_payload, ToolPayload};
pub use invocation::{FailureKind, ToolFailure, ToolInvocationResult};
pub use pool::{user_key, PoolOptions, PooledSession, SessionPool};
pub use types::{McpTool, SessionId, SessionState};
