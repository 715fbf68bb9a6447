//! JSONL (JSON Lines) transcript of finished exchanges
//!
//! Provides append-only logging of exchange summaries to `transcript.jsonl`

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::orchestrator::{ExchangeOutcome, SessionEvent};

/// Summary of one exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRecord {
    /// Session the exchange ran in
    pub session_key: String,
    /// When the first event of the exchange was seen
    pub started_at: DateTime<Utc>,
    /// When the completion event arrived
    pub finished_at: DateTime<Utc>,
    /// How the exchange ended
    pub outcome: ExchangeOutcome,
    /// Number of agent messages
    pub message_count: u32,
    /// Tool names in order of use
    pub tools_used: Vec<String>,
    /// Error text for failed exchanges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only transcript at `<dir>/transcript.jsonl`.
pub struct TranscriptLogger {
    log_path: PathBuf,
}

impl TranscriptLogger {
    /// Create a transcript logger, creating `log_dir` if needed.
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("transcript.jsonl"),
        })
    }

    /// Append one record.
    pub fn append(&self, record: &ExchangeRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json =
            serde_json::to_string(record).context("Failed to serialize exchange record to JSON")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all records in the order they were written.
    pub fn read_all(&self) -> Result<Vec<ExchangeRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))
            })
            .collect()
    }

    /// Get the path to the transcript file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[derive(Debug)]
struct OpenExchange {
    started_at: DateTime<Utc>,
    message_count: u32,
    tools_used: Vec<String>,
    error: Option<String>,
}

impl OpenExchange {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            message_count: 0,
            tools_used: Vec::new(),
            error: None,
        }
    }
}

/// Folds session events into exchange records.
#[derive(Debug, Default)]
pub struct TranscriptRecorder {
    open: HashMap<String, OpenExchange>,
}

impl TranscriptRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one event. Returns the finished record on completion.
    pub fn observe(&mut self, event: &SessionEvent) -> Option<ExchangeRecord> {
        match event {
            SessionEvent::Response {
                session_key, tool, ..
            } => {
                let exchange = self.exchange(session_key);
                exchange.message_count += 1;
                if let Some(info) = tool.as_ref().filter(|info| info.is_tool_use) {
                    exchange.tools_used.push(info.tool_name.clone());
                }
                None
            }
            SessionEvent::Error {
                session_key,
                message,
            } => {
                self.exchange(session_key).error = Some(message.clone());
                None
            }
            SessionEvent::Completed {
                session_key,
                outcome,
            } => {
                let exchange = self
                    .open
                    .remove(session_key)
                    .unwrap_or_else(OpenExchange::new);
                Some(ExchangeRecord {
                    session_key: session_key.clone(),
                    started_at: exchange.started_at,
                    finished_at: Utc::now(),
                    outcome: *outcome,
                    message_count: exchange.message_count,
                    tools_used: exchange.tools_used,
                    error: exchange.error,
                })
            }
        }
    }

    fn exchange(&mut self, session_key: &str) -> &mut OpenExchange {
        self.open
            .entry(session_key.to_string())
            .or_insert_with(OpenExchange::new)
    }
}
