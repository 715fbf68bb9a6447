//! Typed messages from Claude Code's bidirectional stream-json protocol
//!
//! Each stdout line is either an agent message (`assistant`, `user`, `system`,
//! `result`) or a control request the CLI sends when it needs the host to
//! make a decision, such as whether a tool may run.

use serde::Deserialize;
use serde_json::Value;

/// A message emitted by the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// Model output: text and tool-use blocks
    Assistant(ChatMessage),
    /// Echoed user turn, or tool results fed back to the model
    User(ChatMessage),
    /// Session metadata (`init` carries the session id)
    System(SystemMessage),
    /// End of a turn, with usage totals
    Result(ResultMessage),
    /// A message type this crate does not model
    Unknown {
        /// The raw `type` field
        message_type: String,
    },
}

/// Shared shape of `assistant` and `user` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    /// The API-level message payload
    pub message: MessageBody,
    /// Set when the message belongs to a sub-agent spawned by a tool call
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    /// Agent session id (the resumption token)
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Payload of a chat message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageBody {
    /// Plain string for simple user turns, otherwise a list of blocks
    pub content: MessageContent,
}

/// Message content: a bare string or an ordered list of content blocks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Bare text content
    Text(String),
    /// Tagged content blocks
    Blocks(Vec<ContentBlock>),
}

/// One tagged unit inside a message's content list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        #[serde(default)]
        text: String,
    },
    /// The model asks to invoke a tool
    ToolUse {
        /// Tool invocation id
        #[serde(default)]
        id: String,
        /// Tool name (e.g. "Edit", "Bash")
        #[serde(default)]
        name: String,
        /// Tool input as raw JSON
        #[serde(default)]
        input: Value,
    },
    /// Output of a previously requested tool invocation
    ToolResult {
        /// Id of the `tool_use` block this answers
        #[serde(default)]
        tool_use_id: String,
        /// Result payload (string or list of blocks)
        #[serde(default)]
        content: Value,
        /// Whether the tool failed
        #[serde(default)]
        is_error: bool,
    },
    /// Thinking, images and anything newer
    #[serde(other)]
    Unknown,
}

/// `system` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SystemMessage {
    /// e.g. "init"
    #[serde(default)]
    pub subtype: String,
    /// Agent session id
    #[serde(default)]
    pub session_id: Option<String>,
    /// Model in use
    #[serde(default)]
    pub model: Option<String>,
}

/// `result` message, emitted once per completed turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultMessage {
    /// "success" or an error subtype
    #[serde(default)]
    pub subtype: String,
    /// Whether the turn failed
    #[serde(default)]
    pub is_error: bool,
    /// Final text of the turn
    #[serde(default)]
    pub result: Option<String>,
    /// Agent session id
    #[serde(default)]
    pub session_id: Option<String>,
    /// Number of conversation turns
    #[serde(default)]
    pub num_turns: u32,
    /// Total cost in USD
    #[serde(default)]
    pub total_cost_usd: f64,
    /// Duration in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
}

impl AgentMessage {
    /// The agent session id carried by this message, if any and non-empty.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            Self::Assistant(m) | Self::User(m) => m.session_id.as_deref(),
            Self::System(m) => m.session_id.as_deref(),
            Self::Result(m) => m.session_id.as_deref(),
            Self::Unknown { .. } => None,
        };
        id.filter(|s| !s.is_empty())
    }

    /// The content-block list, for messages that carry one.
    #[must_use]
    pub fn content_blocks(&self) -> Option<&[ContentBlock]> {
        match self {
            Self::Assistant(m) | Self::User(m) => match &m.message.content {
                MessageContent::Blocks(blocks) => Some(blocks),
                MessageContent::Text(_) => None,
            },
            _ => None,
        }
    }

    /// Parent tool invocation id for messages produced inside a sub-agent.
    #[must_use]
    pub fn parent_tool_use_id(&self) -> Option<&str> {
        match self {
            Self::Assistant(m) | Self::User(m) => m.parent_tool_use_id.as_deref(),
            _ => None,
        }
    }

    /// Concatenated text of an assistant message.
    #[must_use]
    pub fn assistant_text(&self) -> Option<String> {
        let Self::Assistant(m) = self else {
            return None;
        };
        let text = match &m.message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// A request from the CLI that expects a `control_response`.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Permission check before running a tool
    CanUseTool {
        /// Tool name
        tool_name: String,
        /// Proposed tool input
        input: Value,
    },
    /// Any other control subtype
    Other {
        /// The raw `subtype` field
        subtype: String,
    },
}

/// One decoded stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    /// An agent message
    Message(AgentMessage),
    /// A control request to answer
    Control {
        /// Correlates the eventual `control_response`
        request_id: String,
        /// The request body
        request: ControlRequest,
    },
}

/// Parse a single line of stream-json output.
///
/// Returns `None` if the line is empty, not valid JSON, or has no `type`.
#[must_use]
pub fn parse_line(line: &str) -> Option<StreamLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(line).ok()?;
    let line_type = value.get("type")?.as_str()?.to_string();

    if line_type == "control_request" {
        return parse_control_request(&value);
    }

    Some(StreamLine::Message(parse_message(&line_type, value)))
}

fn parse_message(message_type: &str, value: Value) -> AgentMessage {
    let parsed = match message_type {
        "assistant" => serde_json::from_value(value).map(AgentMessage::Assistant),
        "user" => serde_json::from_value(value).map(AgentMessage::User),
        "system" => serde_json::from_value(value).map(AgentMessage::System),
        "result" => serde_json::from_value(value).map(AgentMessage::Result),
        _ => {
            return AgentMessage::Unknown {
                message_type: message_type.to_string(),
            }
        }
    };

    parsed.unwrap_or_else(|err| {
        tracing::debug!(message_type, error = %err, "undecodable agent message");
        AgentMessage::Unknown {
            message_type: message_type.to_string(),
        }
    })
}

fn parse_control_request(value: &Value) -> Option<StreamLine> {
    let request_id = value.get("request_id")?.as_str()?.to_string();
    let request = value.get("request")?;
    let subtype = request
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let request = if subtype == "can_use_tool" {
        ControlRequest::CanUseTool {
            tool_name: request
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            input: request.get("input").cloned().unwrap_or(Value::Null),
        }
    } else {
        ControlRequest::Other { subtype }
    };

    Some(StreamLine::Control {
        request_id,
        request,
    })
}
