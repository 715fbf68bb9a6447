//! Relay configuration parser
//!
//! Parses `relay.toml`. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::claude::cli::{default_setting_sources, SystemPrompt};
use crate::claude::permissions::PermissionMode;
use crate::session::orchestrator::OrchestratorSettings;
use crate::session::tool::{InterestingTools, DEFAULT_INTERESTING_TOOLS};

/// Environment variable that overrides `[agent] binary`.
pub const BINARY_ENV_VAR: &str = "CLAUDE_CODE_PATH";

/// How the agent process is launched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Claude Code executable (name on `PATH` or a path)
    pub binary: String,
    /// Working directory for new sessions
    pub working_dir: PathBuf,
    /// Permission mode for new sessions
    pub permission_mode: PermissionMode,
    /// Extra instructions appended to the `claude_code` preset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_system_prompt: Option<String>,
    /// Replaces the preset system prompt entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
    /// Settings files Claude Code loads
    pub setting_sources: Vec<String>,
    /// Model override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            working_dir: PathBuf::from("."),
            permission_mode: PermissionMode::Default,
            append_system_prompt: None,
            custom_system_prompt: None,
            setting_sources: default_setting_sources(),
            model: None,
        }
    }
}

impl AgentConfig {
    /// The system prompt selection these options describe.
    #[must_use]
    pub fn system_prompt(&self) -> SystemPrompt {
        match (&self.custom_system_prompt, &self.append_system_prompt) {
            (Some(custom), _) => SystemPrompt::Custom(custom.clone()),
            (None, Some(append)) => SystemPrompt::PresetWithAppend(append.clone()),
            (None, None) => SystemPrompt::Preset,
        }
    }
}

/// Tool approval settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Deny a pending approval after this many seconds (None: wait forever)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
    /// Tools reported as tool-use events
    pub interesting_tools: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: None,
            interesting_tools: DEFAULT_INTERESTING_TOOLS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl PermissionsConfig {
    /// The approval timeout as a `Duration`.
    #[must_use]
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }
}

/// Session persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for session files; sessions live in memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Exchange transcript
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding `transcript.jsonl`; disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,
}

/// Top-level configuration parsed from relay.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Agent launch settings
    pub agent: AgentConfig,
    /// Approval settings
    pub permissions: PermissionsConfig,
    /// Session persistence
    pub store: StoreConfig,
    /// Transcript settings
    pub log: LogConfig,
}

impl RelayConfig {
    /// Parse a relay.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_path(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse relay.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse relay.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the binary with `CLAUDE_CODE_PATH` when it is set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(binary) = std::env::var(BINARY_ENV_VAR) {
            if !binary.trim().is_empty() {
                self.agent.binary = binary;
            }
        }
        self
    }

    /// Orchestrator defaults derived from this configuration.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            working_dir: self.agent.working_dir.clone(),
            permission_mode: self.agent.permission_mode,
            system_prompt: self.agent.system_prompt(),
            setting_sources: self.agent.setting_sources.clone(),
            model: self.agent.model.clone(),
            interesting_tools: InterestingTools::from_names(&self.permissions.interesting_tools),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.agent.binary.trim().is_empty() {
            bail!("[agent] binary cannot be empty");
        }

        if self.agent.append_system_prompt.is_some() && self.agent.custom_system_prompt.is_some() {
            bail!("[agent] append_system_prompt and custom_system_prompt are mutually exclusive");
        }

        for source in &self.agent.setting_sources {
            if !matches!(source.as_str(), "user" | "project" | "local") {
                bail!("Invalid setting source '{source}': expected 'user', 'project' or 'local'");
            }
        }

        if self.permissions.approval_timeout_secs == Some(0) {
            bail!("[permissions] approval_timeout_secs must be greater than zero");
        }

        for tool in &self.permissions.interesting_tools {
            if tool.trim().is_empty() {
                bail!("[permissions] interesting_tools cannot contain an empty tool name");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[agent]
binary = "/opt/homebrew/bin/claude"
working_dir = "/work/project"
permission_mode = "acceptEdits"
append_system_prompt = "Answer briefly."
setting_sources = ["project"]
model = "claude-sonnet-4-5"

[permissions]
approval_timeout_secs = 300
interesting_tools = ["Bash", "Edit"]

[store]
dir = ".relay/sessions"

[log]
transcript_dir = ".relay"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = RelayConfig::parse(FULL_CONFIG).unwrap();
        assert_eq!(config.agent.binary, "/opt/homebrew/bin/claude");
        assert_eq!(config.agent.working_dir, PathBuf::from("/work/project"));
        assert_eq!(config.agent.permission_mode, PermissionMode::AcceptEdits);
        assert_eq!(config.agent.setting_sources, vec!["project"]);
        assert_eq!(config.agent.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(
            config.permissions.approval_timeout(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(config.permissions.interesting_tools, vec!["Bash", "Edit"]);
        assert_eq!(config.store.dir, Some(PathBuf::from(".relay/sessions")));
        assert_eq!(config.log.transcript_dir, Some(PathBuf::from(".relay")));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RelayConfig::parse("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.agent.binary, "claude");
        assert_eq!(config.agent.setting_sources, vec!["user", "project", "local"]);
        assert!(config.permissions.approval_timeout().is_none());
        assert!(config.permissions.interesting_tools.contains(&"TodoWrite".to_string()));
        assert!(config.store.dir.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = RelayConfig::parse("[agent]\nmodel = \"opus\"\n").unwrap();
        assert_eq!(config.agent.model.as_deref(), Some("opus"));
        assert_eq!(config.agent.binary, "claude");
        assert_eq!(config.agent.permission_mode, PermissionMode::Default);
    }

    #[test]
    fn test_rejects_both_system_prompts() {
        let err = RelayConfig::parse(
            "[agent]\nappend_system_prompt = \"a\"\ncustom_system_prompt = \"b\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"), "got: {err}");
    }

    #[test]
    fn test_rejects_empty_binary() {
        assert!(RelayConfig::parse("[agent]\nbinary = \"  \"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = RelayConfig::parse("[permissions]\napproval_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("greater than zero"), "got: {err}");
    }

    #[test]
    fn test_rejects_empty_tool_name() {
        assert!(RelayConfig::parse("[permissions]\ninteresting_tools = [\"Bash\", \"\"]\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_setting_source() {
        let err = RelayConfig::parse("[agent]\nsetting_sources = [\"global\"]\n").unwrap_err();
        assert!(err.to_string().contains("global"), "got: {err}");
    }

    #[test]
    fn test_rejects_unknown_permission_mode() {
        assert!(RelayConfig::parse("[agent]\npermission_mode = \"yolo\"\n").is_err());
    }

    #[test]
    fn test_system_prompt_selection() {
        let mut agent = AgentConfig::default();
        assert_eq!(agent.system_prompt(), SystemPrompt::Preset);

        agent.append_system_prompt = Some("extra".to_string());
        assert_eq!(
            agent.system_prompt(),
            SystemPrompt::PresetWithAppend("extra".to_string())
        );

        agent.append_system_prompt = None;
        agent.custom_system_prompt = Some("replace".to_string());
        assert_eq!(
            agent.system_prompt(),
            SystemPrompt::Custom("replace".to_string())
        );
    }

    #[test]
    fn test_orchestrator_settings() {
        let config = RelayConfig::parse(FULL_CONFIG).unwrap();
        let settings = config.orchestrator_settings();
        assert_eq!(settings.working_dir, PathBuf::from("/work/project"));
        assert_eq!(settings.permission_mode, PermissionMode::AcceptEdits);
        assert!(settings.interesting_tools.contains("Bash"));
        assert!(!settings.interesting_tools.contains("Read"));
        assert_eq!(
            settings.system_prompt,
            SystemPrompt::PresetWithAppend("Answer briefly.".to_string())
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load_or_default(dir.path().join("relay.toml")).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[store]\ndir = \"sessions\"\n").unwrap();
        let config = RelayConfig::from_path(&path).unwrap();
        assert_eq!(config.store.dir, Some(PathBuf::from("sessions")));
    }
}
