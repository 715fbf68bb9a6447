//! Claude Code subprocess agent
//!
//! Runs one `claude` process per exchange. User turns and control responses
//! go to stdin as stream-json lines; stdout lines are decoded into agent
//! messages or `can_use_tool` control requests, which are answered through
//! the exchange's authorizer.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cli::build_command;
use super::message::{parse_line, AgentMessage, ControlRequest, StreamLine};
use crate::session::agent::{Agent, Authorizer, MessageReceiver, QueryRequest};
use crate::session::channel::{InputSequence, UserInput};

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Agent backed by the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    binary: String,
}

impl ClaudeAgent {
    /// Create an agent that spawns `binary` for each exchange.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The executable this agent spawns.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl Agent for ClaudeAgent {
    async fn query(&self, request: QueryRequest) -> Result<MessageReceiver> {
        let QueryRequest {
            session_key,
            options,
            input,
            authorizer,
            cancel,
        } = request;

        let mut cmd = TokioCommand::from(build_command(&self.binary, &options));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn Claude Code process '{}'", self.binary))?;

        let stdin = child.stdin.take().context("Failed to capture stdin")?;
        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;

        tracing::debug!(
            session_key = %session_key,
            pid = child.id().unwrap_or_default(),
            cwd = %options.working_dir.display(),
            "spawned Claude Code"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let finished = cancel.child_token();

        tokio::spawn(write_stdin(stdin, lines_rx));
        tokio::spawn(forward_input(input, lines_tx.clone(), finished.clone()));
        let stderr_tail = tokio::spawn(collect_stderr(stderr));

        let reader = OutputReader {
            session_key,
            messages: tx,
            lines: lines_tx,
            authorizer,
            cancel,
            finished,
        };
        tokio::spawn(reader.run(child, stdout, stderr_tail));

        Ok(rx)
    }
}

/// Encode a user turn as a stream-json stdin line.
#[must_use]
pub fn user_turn_line(input: &UserInput) -> String {
    let content = match input {
        UserInput::Text(text) => Value::String(text.clone()),
        UserInput::Blocks(blocks) => Value::Array(blocks.clone()),
    };
    json!({
        "type": "user",
        "message": {"role": "user", "content": content},
        "parent_tool_use_id": null,
        "session_id": "",
    })
    .to_string()
}

/// Encode a successful `control_response` carrying `payload`.
#[must_use]
pub fn control_success_line(request_id: &str, payload: &Value) -> String {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": payload,
        },
    })
    .to_string()
}

/// Encode an error `control_response`.
#[must_use]
pub fn control_error_line(request_id: &str, error: &str) -> String {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error,
        },
    })
    .to_string()
}

async fn write_stdin(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::debug!(error = %err, "agent stdin closed");
            break;
        }
    }
}

async fn forward_input(
    input: InputSequence,
    lines: mpsc::UnboundedSender<String>,
    finished: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = finished.cancelled() => break,
            next = input.next() => next,
        };
        let Some(turn) = next else { break };
        if lines.send(user_turn_line(&turn)).is_err() {
            break;
        }
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "relay::claude::stderr", "{line}");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Format an exit code for display, returning "unknown" if the process was killed by signal.
fn format_exit_code(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

struct OutputReader {
    session_key: String,
    messages: mpsc::UnboundedSender<Result<AgentMessage>>,
    lines: mpsc::UnboundedSender<String>,
    authorizer: Arc<dyn Authorizer>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl OutputReader {
    async fn run(self, mut child: Child, stdout: ChildStdout, stderr_tail: JoinHandle<String>) {
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let line = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.finished.cancel();
                    if let Err(err) = child.kill().await {
                        tracing::warn!(session_key = %self.session_key, error = %err, "failed to kill Claude Code");
                    }
                    return;
                }
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    if !self.dispatch(&line) {
                        // Nobody is listening any more
                        self.finished.cancel();
                        let _ = child.kill().await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    self.finished.cancel();
                    let _ = child.kill().await;
                    let _ = self
                        .messages
                        .send(Err(anyhow!(err).context("Failed to read Claude Code output")));
                    return;
                }
            }
        }

        self.finished.cancel();
        let status = child.wait().await;
        let stderr = stderr_tail.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => {
                tracing::debug!(session_key = %self.session_key, "Claude Code exited");
            }
            Ok(status) => {
                let mut message = format!(
                    "Claude Code exited with code {}",
                    format_exit_code(status.code())
                );
                if !stderr.is_empty() {
                    message.push_str(": ");
                    message.push_str(&stderr);
                }
                let _ = self.messages.send(Err(anyhow!(message)));
            }
            Err(err) => {
                let _ = self
                    .messages
                    .send(Err(anyhow!(err).context("Failed waiting for Claude Code")));
            }
        }
    }

    /// Route one stdout line. Returns false once the message receiver is gone.
    fn dispatch(&self, line: &str) -> bool {
        match parse_line(line) {
            Some(StreamLine::Message(message)) => self.messages.send(Ok(message)).is_ok(),
            Some(StreamLine::Control {
                request_id,
                request,
            }) => {
                tokio::spawn(answer_control(
                    request_id,
                    request,
                    Arc::clone(&self.authorizer),
                    self.lines.clone(),
                ));
                true
            }
            None => {
                tracing::trace!(session_key = %self.session_key, line, "ignoring non-JSON output");
                true
            }
        }
    }
}

async fn answer_control(
    request_id: String,
    request: ControlRequest,
    authorizer: Arc<dyn Authorizer>,
    lines: mpsc::UnboundedSender<String>,
) {
    let line = match request {
        ControlRequest::CanUseTool { tool_name, input } => {
            let decision = authorizer.authorize(&tool_name, input).await;
            tracing::debug!(request_id = %request_id, tool_name = %tool_name, allowed = decision.is_allow(), "tool authorization answered");
            control_success_line(&request_id, &decision.to_wire())
        }
        ControlRequest::Other { subtype } => {
            tracing::debug!(request_id = %request_id, subtype = %subtype, "unsupported control request");
            control_error_line(&request_id, &format!("Unsupported control request: {subtype}"))
        }
    };

    if lines.send(line).is_err() {
        tracing::debug!(request_id = %request_id, "agent exited before control response was sent");
    }
}
