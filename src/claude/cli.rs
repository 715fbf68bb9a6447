//! Claude Code CLI command builder
//!
//! Constructs the `std::process::Command` for one bidirectional exchange:
//! stream-json on both stdin and stdout, with tool permission prompts routed
//! back to the host over the same pipe.

use std::path::PathBuf;
use std::process::Command;

use super::permissions::PermissionMode;

/// System prompt selection for an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SystemPrompt {
    /// Claude Code's built-in `claude_code` preset, unchanged
    #[default]
    Preset,
    /// The preset with extra instructions appended
    PresetWithAppend(String),
    /// Replace the preset entirely
    Custom(String),
}

/// Configuration bundle handed to the agent when an exchange starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Working directory for the agent process
    pub working_dir: PathBuf,
    /// Agent session id to resume, if the session has one
    pub resume: Option<String>,
    /// Tool approval policy
    pub permission_mode: PermissionMode,
    /// System prompt selection
    pub system_prompt: SystemPrompt,
    /// Which settings files Claude Code loads (`user`, `project`, `local`)
    pub setting_sources: Vec<String>,
    /// Model override
    pub model: Option<String>,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            resume: None,
            permission_mode: PermissionMode::Default,
            system_prompt: SystemPrompt::Preset,
            setting_sources: default_setting_sources(),
            model: None,
        }
    }
}

/// Settings sources loaded when none are configured.
#[must_use]
pub fn default_setting_sources() -> Vec<String> {
    vec!["user".to_string(), "project".to_string(), "local".to_string()]
}

/// Build a `Command` to run Claude Code for one exchange.
///
/// The process reads user turns from stdin and writes messages to stdout,
/// both as stream-json. `--permission-prompt-tool stdio` makes it ask the
/// host through `can_use_tool` control requests instead of prompting a TTY.
#[must_use]
pub fn build_command(binary: &str, options: &ExchangeOptions) -> Command {
    let mut cmd = Command::new(binary);
    cmd.current_dir(&options.working_dir);

    cmd.arg("--output-format").arg("stream-json");
    cmd.arg("--input-format").arg("stream-json");
    cmd.arg("--verbose");
    cmd.arg("--permission-prompt-tool").arg("stdio");
    cmd.arg("--permission-mode")
        .arg(options.permission_mode.as_cli_arg());

    if let Some(session_id) = &options.resume {
        cmd.arg("--resume").arg(session_id);
    }

    match &options.system_prompt {
        SystemPrompt::Preset => {}
        SystemPrompt::PresetWithAppend(extra) => {
            cmd.arg("--append-system-prompt").arg(extra);
        }
        SystemPrompt::Custom(prompt) => {
            cmd.arg("--system-prompt").arg(prompt);
        }
    }

    if !options.setting_sources.is_empty() {
        cmd.arg("--setting-sources")
            .arg(options.setting_sources.join(","));
    }

    if let Some(model) = &options.model {
        cmd.arg("--model").arg(model);
    }

    cmd
}
