//! Relay - chat-to-Claude-Code session relay
//!
//! Relay sits between a chat transport and a Claude Code subprocess. It
//! keeps one live exchange per chat session, feeds follow-up messages into
//! it, pauses gated tool calls until a human approves them, and reports
//! tool activity back to the chat.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod claude;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod log;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use claude::message::{parse_line, AgentMessage, ContentBlock, StreamLine};
pub use claude::permissions::{PermissionDecision, PermissionMode};
pub use claude::process::ClaudeAgent;
pub use config::RelayConfig;
pub use error::StoreError;
pub use session::agent::{Agent, Authorizer, MessageReceiver, QueryRequest};
pub use session::channel::{InputSequence, StreamChannels, UserInput};
pub use session::orchestrator::{
    ExchangeOutcome, OrchestratorSettings, SessionEvent, SessionOrchestrator,
};
pub use session::permission::{ApprovalNotifier, ApprovalRequest, PermissionCoordinator};
pub use session::store::{FileSessionStore, MemorySessionStore, Session, SessionStore};
pub use session::tool::{extract_tool_info, InterestingTools, ToolCorrelator, ToolInfo};
