//! Shared test utilities
//!
//! Builders for agent messages used across test modules. Only compiled in
//! test builds.

use serde_json::{json, Value};

use crate::claude::message::{parse_line, AgentMessage, StreamLine};

/// Decode a JSON value the same way a stdout line would be decoded.
#[must_use]
pub fn message_from(value: &Value) -> AgentMessage {
    match parse_line(&value.to_string()) {
        Some(StreamLine::Message(message)) => message,
        other => panic!("Expected an agent message, got {other:?}"),
    }
}

/// An assistant message with the given content blocks.
#[must_use]
pub fn assistant_message(blocks: &[Value]) -> AgentMessage {
    message_from(&json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": blocks},
    }))
}

/// A user message with the given content blocks.
#[must_use]
pub fn user_message(blocks: &[Value]) -> AgentMessage {
    message_from(&json!({
        "type": "user",
        "message": {"role": "user", "content": blocks},
    }))
}

/// A `system/init` message announcing `session_id`.
#[must_use]
pub fn system_init(session_id: &str) -> AgentMessage {
    message_from(&json!({
        "type": "system",
        "subtype": "init",
        "session_id": session_id,
        "model": "claude-sonnet-4-5",
    }))
}
