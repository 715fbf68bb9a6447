//! Agent boundary
//!
//! The orchestrator talks to the agent only through these traits, so the
//! Claude Code subprocess and scripted test agents are interchangeable.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::InputSequence;
use crate::claude::cli::ExchangeOptions;
use crate::claude::message::AgentMessage;
use crate::claude::permissions::PermissionDecision;

/// The agent's "may I run this tool" callback.
///
/// Infallible by contract: every failure must come back as a denial.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `tool_name` may run with `input`.
    async fn authorize(&self, tool_name: &str, input: Value) -> PermissionDecision;
}

/// Messages emitted by a running exchange, in emission order.
///
/// The sender closing means the exchange ended normally; an `Err` item
/// means it failed.
pub type MessageReceiver = mpsc::UnboundedReceiver<Result<AgentMessage>>;

/// Everything an agent needs to start one exchange.
pub struct QueryRequest {
    /// Session the exchange belongs to
    pub session_key: String,
    /// Working directory, resumption token, permission mode and prompt setup
    pub options: ExchangeOptions,
    /// User turns to feed the agent
    pub input: InputSequence,
    /// Tool authorization callback
    pub authorizer: Arc<dyn Authorizer>,
    /// Triggered when the exchange is aborted
    pub cancel: CancellationToken,
}

/// Something that can run an exchange.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Start an exchange and return its message stream.
    async fn query(&self, request: QueryRequest) -> Result<MessageReceiver>;
}
