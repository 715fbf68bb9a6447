//! Console rendering for session events
//!
//! Turns `SessionEvent`s, approval requests and diagnostics into colored
//! terminal lines. Formatting functions return strings; the caller decides
//! where they go. All console output goes to stderr so stdout stays free.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use serde_json::Value;

use crate::claude::message::{AgentMessage, ContentBlock};
use crate::doctor::{DiagnosticReport, Severity};
use crate::session::orchestrator::{ExchangeOutcome, SessionEvent};
use crate::session::permission::{ApprovalNotifier, ApprovalRequest, PendingSummary};
use crate::session::store::{Session, SessionStore};
use crate::session::tool::{ToolCorrelator, ToolInfo};

/// Longest input preview shown in an approval prompt.
const INPUT_PREVIEW_CHARS: usize = 120;

/// Approval notifier that prints the request and the commands to settle it.
#[derive(Debug, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    /// Create a console transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ApprovalNotifier for ConsoleTransport {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        eprintln!("{}", format_approval_request(request));
        Ok(())
    }
}

/// Render an approval prompt.
#[must_use]
pub fn format_approval_request(request: &ApprovalRequest) -> String {
    let mut preview = summarize_tool_input(&request.tool_name, &request.input);
    if preview.is_empty() && !request.input.is_null() {
        preview = format!(" {}", truncate(&request.input.to_string(), INPUT_PREVIEW_CHARS));
    }

    format!(
        "{} {}{}\n  {} /approve {}   /deny {}",
        "? Approve".yellow().bold(),
        request.tool_name.bold(),
        preview.dimmed(),
        "→".dimmed(),
        request.request_id,
        request.request_id,
    )
}

/// Renders events, pairing tool uses with their results per session.
pub struct EventRenderer {
    lookup: Arc<dyn SessionStore>,
    correlators: HashMap<String, ToolCorrelator>,
}

impl EventRenderer {
    /// Create a renderer that resolves unseen tool ids through `lookup`.
    pub fn new(lookup: Arc<dyn SessionStore>) -> Self {
        Self {
            lookup,
            correlators: HashMap::new(),
        }
    }

    /// Lines to print for one event. May be empty.
    pub async fn render(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::Response {
                session_key,
                message,
                tool,
                parent_id,
            } => {
                let indent = if parent_id.is_some() { "    " } else { "  " };
                let lines = match tool {
                    Some(info) => {
                        self.render_tool(session_key, message, info, parent_id.as_deref())
                            .await
                    }
                    None => render_message(message),
                };
                lines
                    .into_iter()
                    .map(|line| format!("{indent}{line}"))
                    .collect()
            }
            SessionEvent::Error { message, .. } => {
                vec![format!("{} {}", "Error:".red().bold(), message.red())]
            }
            SessionEvent::Completed {
                session_key,
                outcome,
            } => {
                let mut lines = Vec::new();
                if let Some(mut correlator) = self.correlators.remove(session_key) {
                    for record in correlator.finish().into_iter().filter(|r| r.use_observed) {
                        lines.push(format!(
                            "  {} {} did not finish",
                            "⚠".yellow().bold(),
                            record.tool_name.bold()
                        ));
                    }
                }
                lines.push(format_outcome(*outcome));
                lines
            }
        }
    }

    async fn render_tool(
        &mut self,
        session_key: &str,
        message: &AgentMessage,
        info: &ToolInfo,
        parent_id: Option<&str>,
    ) -> Vec<String> {
        let lookup = Arc::clone(&self.lookup);
        let correlator = self
            .correlators
            .entry(session_key.to_string())
            .or_insert_with(|| ToolCorrelator::new(lookup));
        let record = correlator.observe(info, parent_id).await;

        if info.is_tool_use {
            let summary = find_tool_input(message, &info.tool_id)
                .map(|input| summarize_tool_input(&record.tool_name, input))
                .unwrap_or_default();
            return vec![format!(
                "{} {}{}",
                "▶".blue(),
                record.tool_name.bold(),
                summary.dimmed()
            )];
        }

        match find_tool_error(message, &info.tool_id) {
            Some(error) => vec![format!(
                "{} {} {}",
                "✗".red().bold(),
                record.tool_name.bold(),
                truncate(&error, 100).red()
            )],
            None => vec![format!("{} {}", "✓".green(), record.tool_name.dimmed())],
        }
    }
}

fn render_message(message: &AgentMessage) -> Vec<String> {
    match message {
        AgentMessage::Assistant(_) => message
            .assistant_text()
            .map(|text| text.lines().map(String::from).collect())
            .unwrap_or_default(),
        AgentMessage::System(system) if system.subtype == "init" => {
            let model = system.model.as_deref().unwrap_or("unknown model");
            vec![format!("{} {model}", "Model:".dimmed())]
        }
        AgentMessage::Result(result) => {
            let secs = result.duration_ms / 1000;
            let status = if result.is_error {
                "turn failed".red().to_string()
            } else {
                "turn done".dimmed().to_string()
            };
            vec![format!(
                "{status} {}",
                format!(
                    "| {} turns | ${:.2} | {}m {}s",
                    result.num_turns,
                    result.total_cost_usd,
                    secs / 60,
                    secs % 60
                )
                .dimmed()
            )]
        }
        AgentMessage::User(_) | AgentMessage::System(_) | AgentMessage::Unknown { .. } => {
            Vec::new()
        }
    }
}

fn format_outcome(outcome: ExchangeOutcome) -> String {
    match outcome {
        ExchangeOutcome::Completed => "exchange finished".dimmed().to_string(),
        ExchangeOutcome::Cancelled => "exchange aborted".yellow().to_string(),
        ExchangeOutcome::Failed => "exchange failed".red().to_string(),
    }
}

fn find_tool_input<'a>(message: &'a AgentMessage, tool_id: &str) -> Option<&'a Value> {
    message.content_blocks()?.iter().find_map(|block| match block {
        ContentBlock::ToolUse { id, input, .. } if id == tool_id => Some(input),
        _ => None,
    })
}

fn find_tool_error(message: &AgentMessage, tool_id: &str) -> Option<String> {
    message.content_blocks()?.iter().find_map(|block| match block {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error: true,
        } if tool_use_id == tool_id => Some(result_text(content)),
        _ => None,
    })
}

fn result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render `/status` output.
#[must_use]
pub fn format_status(
    session_key: &str,
    running: bool,
    session: Option<&Session>,
    pending: &[PendingSummary],
) -> String {
    let state = if running {
        "running".green().to_string()
    } else {
        "idle".dimmed().to_string()
    };
    let mut out = format!("{} {} ({state})", "Session:".bold(), session_key);

    match session {
        Some(session) => {
            let token = session.resume_token.as_deref().unwrap_or("none yet");
            out.push_str(&format!(
                "\n  resume: {token}\n  cwd: {}\n  mode: {}\n  last activity: {}",
                session.working_dir.display(),
                session.permission_mode,
                session.last_activity.format("%Y-%m-%d %H:%M:%S UTC"),
            ));
        }
        None => out.push_str("\n  no session record"),
    }

    if pending.is_empty() {
        out.push_str("\n  no pending approvals");
    } else {
        out.push_str(&format!("\n  {} pending approval(s):", pending.len()));
        for request in pending {
            out.push_str(&format!(
                "\n    {} {} (since {})",
                request.request_id,
                request.tool_name.bold(),
                request.created_at.format("%H:%M:%S"),
            ));
        }
    }
    out
}

/// Render a diagnostic report, one block per finding.
#[must_use]
pub fn render_diagnostic_report(report: &DiagnosticReport) -> String {
    if report.is_clean() {
        return format!("{} No issues found.", "✓".green().bold());
    }

    let mut out = String::new();
    for finding in &report.findings {
        let label = match finding.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Info => "info".cyan().bold(),
        };
        out.push_str(&format!("{label} [{}] {}\n", finding.code, finding.message));
        if let Some(suggestion) = &finding.suggestion {
            out.push_str(&format!("  {} {suggestion}\n", "→".dimmed()));
        }
    }
    out.push_str(&format!(
        "\n{} error(s), {} warning(s), {} info",
        report.error_count(),
        report.warning_count(),
        report.info_count()
    ));
    out
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Summarize tool input as a short one-line string
fn summarize_tool_input(tool_name: &str, input: &Value) -> String {
    let field = |name: &str| input.get(name).and_then(Value::as_str);
    match tool_name {
        "Edit" | "MultiEdit" | "Read" | "Write" => {
            field("file_path").map_or_else(String::new, |p| format!(" {p}"))
        }
        "NotebookEdit" => field("notebook_path").map_or_else(String::new, |p| format!(" {p}")),
        "Bash" => field("command").map_or_else(String::new, |c| format!(" `{}`", truncate(c, 60))),
        "Glob" => field("pattern").map_or_else(String::new, |p| format!(" {p}")),
        "Grep" => field("pattern").map_or_else(String::new, |p| format!(" /{p}/")),
        "WebFetch" => field("url").map_or_else(String::new, |u| format!(" {u}")),
        "WebSearch" => field("query").map_or_else(String::new, |q| format!(" \"{q}\"")),
        "Task" => field("description").map_or_else(String::new, |d| format!(" {d}")),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctor::Finding;
    use crate::session::store::MemorySessionStore;
    use crate::testutil::{assistant_message, system_init, user_message};
    use chrono::Utc;
    use serde_json::json;

    fn renderer() -> (Arc<MemorySessionStore>, EventRenderer) {
        let store = Arc::new(MemorySessionStore::new());
        let renderer = EventRenderer::new(store.clone());
        (store, renderer)
    }

    fn response(message: AgentMessage, tool: Option<ToolInfo>) -> SessionEvent {
        SessionEvent::Response {
            session_key: "console".to_string(),
            message,
            tool,
            parent_id: None,
        }
    }

    #[test]
    fn test_summarize_edit_tool() {
        let input = json!({"file_path": "src/main.rs", "old_string": "foo", "new_string": "bar"});
        assert_eq!(summarize_tool_input("Edit", &input), " src/main.rs");
    }

    #[test]
    fn test_summarize_bash_tool() {
        let input = json!({"command": "cargo test --lib"});
        assert_eq!(summarize_tool_input("Bash", &input), " `cargo test --lib`");
    }

    #[test]
    fn test_summarize_bash_long_command_truncated() {
        let input = json!({"command": "a".repeat(100)});
        let result = summarize_tool_input("Bash", &input);
        assert!(result.len() < 70);
        assert!(result.ends_with("...`"));
    }

    #[test]
    fn test_summarize_grep_and_web_search() {
        assert_eq!(
            summarize_tool_input("Grep", &json!({"pattern": "fn main"})),
            " /fn main/"
        );
        assert_eq!(
            summarize_tool_input("WebSearch", &json!({"query": "tokio select"})),
            " \"tokio select\""
        );
    }

    #[test]
    fn test_summarize_unknown_tool_or_missing_field() {
        assert_eq!(summarize_tool_input("Mystery", &json!({"x": 1})), "");
        assert_eq!(summarize_tool_input("Edit", &json!({})), "");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(50);
        let short = truncate(&text, 10);
        assert_eq!(short.chars().count(), 10);
        assert!(short.ends_with("..."));
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_approval_request_lists_commands() {
        let request = ApprovalRequest {
            request_id: "req-1".to_string(),
            session_key: "console".to_string(),
            tool_name: "Bash".to_string(),
            input: json!({"command": "rm -rf build"}),
        };
        let text = format_approval_request(&request);
        assert!(text.contains("Bash"));
        assert!(text.contains("rm -rf build"));
        assert!(text.contains("/approve req-1"));
        assert!(text.contains("/deny req-1"));
    }

    #[test]
    fn test_approval_request_falls_back_to_json_preview() {
        let request = ApprovalRequest {
            request_id: "req-2".to_string(),
            session_key: "console".to_string(),
            tool_name: "mcp__db__query".to_string(),
            input: json!({"sql": "select 1"}),
        };
        assert!(format_approval_request(&request).contains("select 1"));
    }

    #[tokio::test]
    async fn test_render_tool_use_then_result() {
        let (_store, mut renderer) = renderer();

        let use_message = assistant_message(&[json!({
            "type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}
        })]);
        let lines = renderer
            .render(&response(use_message, Some(ToolInfo::tool_use("t1", "Bash"))))
            .await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Bash"));
        assert!(lines[0].contains("ls"));

        let result_message = user_message(&[json!({
            "type": "tool_result", "tool_use_id": "t1", "content": "file.txt"
        })]);
        let lines = renderer
            .render(&response(result_message, Some(ToolInfo::tool_result("t1"))))
            .await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Bash"), "result should carry the use's name: {lines:?}");
    }

    #[tokio::test]
    async fn test_render_result_resolves_name_from_store() {
        let (store, mut renderer) = renderer();
        store.record_tool_name("t9", "Write").await.unwrap();

        let result_message = user_message(&[json!({
            "type": "tool_result", "tool_use_id": "t9", "content": "denied", "is_error": true
        })]);
        let lines = renderer
            .render(&response(result_message, Some(ToolInfo::tool_result("t9"))))
            .await;
        assert!(lines[0].contains("Write"));
        assert!(lines[0].contains("denied"));
    }

    #[tokio::test]
    async fn test_render_assistant_text_and_init() {
        let (_store, mut renderer) = renderer();

        let text = assistant_message(&[json!({"type": "text", "text": "line one\nline two"})]);
        let lines = renderer.render(&response(text, None)).await;
        assert_eq!(lines.len(), 2);

        let lines = renderer.render(&response(system_init("sess-1"), None)).await;
        assert!(lines[0].contains("claude-sonnet-4-5"));
    }

    #[tokio::test]
    async fn test_render_completion_reports_unfinished_tools() {
        let (_store, mut renderer) = renderer();
        let use_message = assistant_message(&[json!({
            "type": "tool_use", "id": "t1", "name": "Edit", "input": {"file_path": "a.rs"}
        })]);
        renderer
            .render(&response(use_message, Some(ToolInfo::tool_use("t1", "Edit"))))
            .await;

        let lines = renderer
            .render(&SessionEvent::Completed {
                session_key: "console".to_string(),
                outcome: ExchangeOutcome::Cancelled,
            })
            .await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Edit"));
        assert!(lines[1].contains("aborted"));
    }

    #[tokio::test]
    async fn test_render_error() {
        let (_store, mut renderer) = renderer();
        let lines = renderer
            .render(&SessionEvent::Error {
                session_key: "console".to_string(),
                message: "agent crashed".to_string(),
            })
            .await;
        assert!(lines[0].contains("Error:"));
        assert!(lines[0].contains("agent crashed"));
    }

    #[test]
    fn test_format_status_lists_pending() {
        let session = Session::new("console", "/work", crate::claude::permissions::PermissionMode::Plan);
        let pending = vec![PendingSummary {
            request_id: "req-1".to_string(),
            session_key: "console".to_string(),
            tool_name: "Bash".to_string(),
            created_at: Utc::now(),
        }];
        let text = format_status("console", true, Some(&session), &pending);
        assert!(text.contains("running"));
        assert!(text.contains("none yet"));
        assert!(text.contains("plan"));
        assert!(text.contains("req-1"));
    }

    #[test]
    fn test_format_status_without_record() {
        let text = format_status("console", false, None, &[]);
        assert!(text.contains("idle"));
        assert!(text.contains("no session record"));
        assert!(text.contains("no pending approvals"));
    }

    #[test]
    fn test_render_diagnostic_report() {
        let report = DiagnosticReport {
            findings: vec![Finding {
                severity: Severity::Error,
                code: "D001".to_string(),
                message: "Claude Code binary not found".to_string(),
                suggestion: Some("Install Claude Code".to_string()),
            }],
        };
        let text = render_diagnostic_report(&report);
        assert!(text.contains("D001"));
        assert!(text.contains("Install Claude Code"));
        assert!(text.contains("1 error(s)"));
    }

    #[test]
    fn test_render_clean_report() {
        let report = DiagnosticReport { findings: vec![] };
        assert!(render_diagnostic_report(&report).contains("No issues"));
    }
}
