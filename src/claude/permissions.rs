//! Permission modes and tool authorization decisions
//!
//! `PermissionMode` is the policy handed to Claude Code at exchange start
//! (`--permission-mode`). `PermissionDecision` is the answer to a
//! `can_use_tool` control request.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// How much tool execution requires human approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before every gated tool
    #[default]
    Default,
    /// File edits are auto-approved, everything else asks
    AcceptEdits,
    /// Read-only planning, no side effects
    Plan,
    /// Never ask
    BypassPermissions,
}

impl PermissionMode {
    /// All modes, in escalating order of autonomy.
    pub const ALL: [Self; 4] = [
        Self::Plan,
        Self::Default,
        Self::AcceptEdits,
        Self::BypassPermissions,
    ];

    /// The value Claude Code expects for `--permission-mode`.
    #[must_use]
    pub const fn as_cli_arg(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cli_arg())
    }
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the CLI spelling plus a couple of chat-friendly aliases
        match s.trim() {
            "default" | "ask" => Ok(Self::Default),
            "acceptEdits" | "accept-edits" | "accept_edits" => Ok(Self::AcceptEdits),
            "plan" | "read-only" => Ok(Self::Plan),
            "bypassPermissions" | "bypass-permissions" | "bypass" => Ok(Self::BypassPermissions),
            other => bail!(
                "Unknown permission mode '{other}'. Expected one of: default, acceptEdits, plan, bypassPermissions"
            ),
        }
    }
}

/// Outcome of a tool authorization request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Run the tool with the (possibly modified) input
    Allow {
        /// Input the tool should run with
        updated_input: Value,
    },
    /// Refuse the tool call
    Deny {
        /// Reason shown to the model
        message: String,
    },
}

impl PermissionDecision {
    /// Build a denial.
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }

    /// Whether the tool may run.
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Wire shape of the decision inside a `control_response`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Allow { updated_input } => json!({
                "behavior": "allow",
                "updatedInput": updated_input,
            }),
            Self::Deny { message } => json!({
                "behavior": "deny",
                "message": message,
            }),
        }
    }
}
