//! Tool invocation correlation
//!
//! The orchestrator tags each agent message with at most one `ToolInfo`:
//! a tool-use from an assistant message, or a tool-result from a user
//! message. `ToolCorrelator` pairs the two phases back up by invocation id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::store::SessionStore;
use crate::claude::message::{AgentMessage, ContentBlock};

/// Tools whose invocations are reported by default.
pub const DEFAULT_INTERESTING_TOOLS: &[&str] = &[
    "Bash",
    "Edit",
    "MultiEdit",
    "Write",
    "Read",
    "Glob",
    "Grep",
    "NotebookEdit",
    "WebFetch",
    "WebSearch",
    "Task",
    "TodoWrite",
];

/// Allow-list of tool names worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestingTools(HashSet<String>);

impl InterestingTools {
    /// Build from explicit names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Whether `name` is on the list.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

impl Default for InterestingTools {
    fn default() -> Self {
        Self::from_names(DEFAULT_INTERESTING_TOOLS.iter().copied())
    }
}

/// Tool correlation event attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    /// Invocation id assigned by the agent
    pub tool_id: String,
    /// Tool name; blank on results, resolved downstream
    pub tool_name: String,
    /// The message requests the tool
    pub is_tool_use: bool,
    /// The message carries the tool's output
    pub is_tool_result: bool,
}

impl ToolInfo {
    /// A tool-use event.
    pub fn tool_use(tool_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: tool_name.into(),
            is_tool_use: true,
            is_tool_result: false,
        }
    }

    /// A tool-result event. The name is unknown at this point.
    pub fn tool_result(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tool_name: String::new(),
            is_tool_use: false,
            is_tool_result: true,
        }
    }
}

/// Extract the tool correlation event carried by `message`, if any.
///
/// Only messages with a content-block list are inspected. Assistant
/// messages yield the first tool-use block whose name is interesting;
/// uninteresting tool-use blocks are skipped and the scan continues. User
/// messages yield the first tool-result block with a non-empty id.
#[must_use]
pub fn extract_tool_info(message: &AgentMessage, interesting: &InterestingTools) -> Option<ToolInfo> {
    let blocks = message.content_blocks()?;

    match message {
        AgentMessage::Assistant(_) => blocks.iter().find_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } if interesting.contains(name) => {
                Some(ToolInfo::tool_use(id.as_str(), name.as_str()))
            }
            _ => None,
        }),
        AgentMessage::User(_) => blocks.iter().find_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } if !tool_use_id.is_empty() => {
                Some(ToolInfo::tool_result(tool_use_id.as_str()))
            }
            _ => None,
        }),
        _ => None,
    }
}

/// Correlation state of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRecord {
    /// Invocation id
    pub tool_id: String,
    /// Tool name, or "unknown" if it could not be resolved
    pub tool_name: String,
    /// Parent invocation for calls made inside a sub-agent
    pub parent_id: Option<String>,
    /// The tool-use was seen
    pub use_observed: bool,
    /// The tool-result was seen
    pub result_observed: bool,
}

impl ToolRecord {
    /// Both phases have been observed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.use_observed && self.result_observed
    }
}

/// Name used when neither the use nor the side lookup knows the tool.
pub const UNKNOWN_TOOL_NAME: &str = "unknown";

/// Pairs tool-use and tool-result events into records.
pub struct ToolCorrelator {
    records: HashMap<String, ToolRecord>,
    tools_used: Vec<String>,
    lookup: Arc<dyn SessionStore>,
}

impl ToolCorrelator {
    /// Create a correlator that falls back to `lookup` for unseen ids.
    pub fn new(lookup: Arc<dyn SessionStore>) -> Self {
        Self {
            records: HashMap::new(),
            tools_used: Vec::new(),
            lookup,
        }
    }

    /// Record one event and return the updated record.
    ///
    /// A result without a prior use resolves the tool name through the side
    /// lookup instead of failing.
    pub async fn observe(&mut self, info: &ToolInfo, parent_id: Option<&str>) -> ToolRecord {
        if info.is_tool_use {
            self.tools_used.push(info.tool_name.clone());
            let record = self
                .records
                .entry(info.tool_id.clone())
                .or_insert_with(|| ToolRecord {
                    tool_id: info.tool_id.clone(),
                    tool_name: info.tool_name.clone(),
                    parent_id: parent_id.map(String::from),
                    use_observed: false,
                    result_observed: false,
                });
            record.use_observed = true;
            if record.tool_name == UNKNOWN_TOOL_NAME {
                record.tool_name.clone_from(&info.tool_name);
            }
            return record.clone();
        }

        if !self.records.contains_key(&info.tool_id) {
            let tool_name = self.resolve_name(&info.tool_id).await;
            self.records.insert(
                info.tool_id.clone(),
                ToolRecord {
                    tool_id: info.tool_id.clone(),
                    tool_name,
                    parent_id: parent_id.map(String::from),
                    use_observed: false,
                    result_observed: false,
                },
            );
        }

        match self.records.get_mut(&info.tool_id) {
            Some(record) => {
                record.result_observed = true;
                record.clone()
            }
            None => ToolRecord {
                tool_id: info.tool_id.clone(),
                tool_name: UNKNOWN_TOOL_NAME.to_string(),
                parent_id: parent_id.map(String::from),
                use_observed: false,
                result_observed: true,
            },
        }
    }

    async fn resolve_name(&self, tool_id: &str) -> String {
        match self.lookup.tool_name(tool_id).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::debug!(tool_id, "tool result without a known tool name");
                UNKNOWN_TOOL_NAME.to_string()
            }
            Err(err) => {
                tracing::warn!(tool_id, error = %err, "tool name lookup failed");
                UNKNOWN_TOOL_NAME.to_string()
            }
        }
    }

    /// Look up the record for an invocation id.
    #[must_use]
    pub fn record(&self, tool_id: &str) -> Option<&ToolRecord> {
        self.records.get(tool_id)
    }

    /// Tool names in order of use.
    #[must_use]
    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    /// Close out the exchange: returns the invocations that never produced
    /// a result, and clears all state.
    pub fn finish(&mut self) -> Vec<ToolRecord> {
        let mut unfinished: Vec<ToolRecord> = self
            .records
            .drain()
            .map(|(_, record)| record)
            .filter(|record| !record.result_observed)
            .collect();
        unfinished.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        self.tools_used.clear();
        unfinished
    }
}
