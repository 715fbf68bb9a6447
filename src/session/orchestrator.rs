//! Session orchestrator
//!
//! Owns the per-session state machine: input on an idle session starts an
//! exchange in the background, input on a running one is appended to its
//! stream channel. The exchange loop persists resumption tokens, tags
//! messages with tool correlation info and publishes `SessionEvent`s.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::agent::{Agent, QueryRequest};
use super::channel::{ChannelHandle, StreamChannels, UserInput};
use super::permission::{PermissionCoordinator, SessionAuthorizer};
use super::store::{Session, SessionStore};
use super::tool::{extract_tool_info, InterestingTools, ToolInfo};
use crate::claude::cli::{default_setting_sources, ExchangeOptions, SystemPrompt};
use crate::claude::message::AgentMessage;
use crate::claude::permissions::PermissionMode;

/// Denial reason for requests still pending when their session is reset.
pub const SESSION_RESET_MESSAGE: &str = "Session was reset before a decision arrived";

/// Defaults applied to new sessions and every exchange.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Working directory for new sessions
    pub working_dir: PathBuf,
    /// Permission mode for new sessions
    pub permission_mode: PermissionMode,
    /// System prompt selection
    pub system_prompt: SystemPrompt,
    /// Settings sources passed to the agent
    pub setting_sources: Vec<String>,
    /// Model override
    pub model: Option<String>,
    /// Tools reported as tool-use events
    pub interesting_tools: InterestingTools,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            permission_mode: PermissionMode::Default,
            system_prompt: SystemPrompt::Preset,
            setting_sources: default_setting_sources(),
            model: None,
            interesting_tools: InterestingTools::default(),
        }
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeOutcome {
    /// The agent's message stream ended
    Completed,
    /// Aborted on request
    Cancelled,
    /// The agent failed; an `Error` event preceded the completion
    Failed,
}

impl ExchangeOutcome {
    /// Completed and cancelled exchanges both count as success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Lifecycle events published to the chat transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An agent message, in emission order
    Response {
        /// Session the message belongs to
        session_key: String,
        /// The message
        message: AgentMessage,
        /// Tool correlation info, if the message carries any
        tool: Option<ToolInfo>,
        /// Parent tool invocation for sub-agent messages
        parent_id: Option<String>,
    },
    /// The exchange failed
    Error {
        /// Session
        session_key: String,
        /// Human-readable failure description
        message: String,
    },
    /// The exchange is over and the session is idle again
    Completed {
        /// Session
        session_key: String,
        /// How it ended
        outcome: ExchangeOutcome,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_key(&self) -> &str {
        match self {
            Self::Response { session_key, .. }
            | Self::Error { session_key, .. }
            | Self::Completed { session_key, .. } => session_key,
        }
    }
}

/// Top-level coordinator between the chat transport and the agent.
#[derive(Clone)]
pub struct SessionOrchestrator {
    agent: Arc<dyn Agent>,
    store: Arc<dyn SessionStore>,
    permissions: Arc<PermissionCoordinator>,
    channels: Arc<StreamChannels>,
    settings: Arc<OrchestratorSettings>,
    events: mpsc::UnboundedSender<SessionEvent>,
    // Serializes read-modify-write cycles on session records
    records: Arc<tokio::sync::Mutex<()>>,
}

impl SessionOrchestrator {
    /// Create an orchestrator and the receiver its events are published on.
    pub fn new(
        agent: Arc<dyn Agent>,
        store: Arc<dyn SessionStore>,
        permissions: Arc<PermissionCoordinator>,
        settings: OrchestratorSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            agent,
            store,
            permissions,
            channels: Arc::new(StreamChannels::new()),
            settings: Arc::new(settings),
            events,
            records: Arc::new(tokio::sync::Mutex::new(())),
        };
        (orchestrator, rx)
    }

    /// Send user input to the session, starting an exchange if it is idle.
    ///
    /// Creates the session record on first input.
    pub async fn add_input(&self, session_key: &str, input: UserInput) -> Result<()> {
        let session = self.ensure_session(session_key).await?;

        let handle = self.channels.get_or_create(session_key);
        if handle.created {
            self.spawn_exchange(session_key, Some(session), handle);
        }

        self.channels.enqueue(session_key, input);
        Ok(())
    }

    /// Abort the running exchange. Returns whether one was running.
    ///
    /// Pending approval requests of the session are left untouched.
    pub fn abort(&self, session_key: &str) -> bool {
        let cancelled = self.channels.cancel(session_key);
        if cancelled {
            tracing::info!(session_key, "exchange aborted");
        }
        cancelled
    }

    /// Whether an exchange is running for the session.
    #[must_use]
    pub fn is_running(&self, session_key: &str) -> bool {
        self.channels.is_active(session_key)
    }

    /// Deliver the human's approval decision. Unknown ids are ignored.
    pub fn settle(&self, request_id: &str, approved: bool) -> bool {
        self.permissions.settle(request_id, approved)
    }

    /// The permission coordinator shared with the transport.
    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionCoordinator> {
        &self.permissions
    }

    /// Read the session record.
    pub async fn session(&self, session_key: &str) -> Result<Option<Session>> {
        self.store.get(session_key).await
    }

    /// Change the permission mode used from the next exchange on.
    pub async fn set_permission_mode(&self, session_key: &str, mode: PermissionMode) -> Result<()> {
        self.ensure_session(session_key).await?;
        self.update_session(session_key, |session| session.permission_mode = mode)
            .await?;
        Ok(())
    }

    /// Forget the session: abort it, deny its pending approvals, delete the record.
    pub async fn reset(&self, session_key: &str) -> Result<()> {
        self.abort(session_key);
        let denied = self
            .permissions
            .deny_session(session_key, SESSION_RESET_MESSAGE);
        let _lock = self.records.lock().await;
        self.store
            .delete(session_key)
            .await
            .with_context(|| format!("Failed to delete session '{session_key}'"))?;
        tracing::info!(session_key, denied, "session reset");
        Ok(())
    }

    /// Cancel every running exchange.
    pub fn shutdown(&self) {
        self.channels.shutdown();
    }

    async fn ensure_session(&self, session_key: &str) -> Result<Session> {
        let _lock = self.records.lock().await;
        let existing = self
            .store
            .get(session_key)
            .await
            .with_context(|| format!("Failed to load session '{session_key}'"))?;

        let mut session = existing.unwrap_or_else(|| {
            tracing::info!(session_key, "creating session");
            Session::new(
                session_key,
                self.settings.working_dir.clone(),
                self.settings.permission_mode,
            )
        });
        session.touch();
        self.store
            .save(&session)
            .await
            .with_context(|| format!("Failed to save session '{session_key}'"))?;
        Ok(session)
    }

    /// Apply `change` to the stored record. `Ok(None)` if it no longer exists.
    async fn update_session<F>(&self, session_key: &str, change: F) -> Result<Option<Session>>
    where
        F: FnOnce(&mut Session) + Send,
    {
        let _lock = self.records.lock().await;
        let Some(mut session) = self.store.get(session_key).await? else {
            return Ok(None);
        };
        change(&mut session);
        session.touch();
        self.store.save(&session).await?;
        Ok(Some(session))
    }

    fn exchange_options(&self, session: &Session) -> ExchangeOptions {
        ExchangeOptions {
            working_dir: session.working_dir.clone(),
            resume: session.resume_token.clone(),
            permission_mode: session.permission_mode,
            system_prompt: self.settings.system_prompt.clone(),
            setting_sources: self.settings.setting_sources.clone(),
            model: self.settings.model.clone(),
        }
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("no event subscriber, event dropped");
        }
    }

    /// Run an exchange on `handle` in the background. Without a session the
    /// record is loaded (or recreated) first.
    fn spawn_exchange(&self, session_key: &str, session: Option<Session>, handle: ChannelHandle) {
        let this = self.clone();
        let session_key = session_key.to_string();
        tokio::spawn(async move {
            let session = match session {
                Some(session) => session,
                None if handle.cancel.is_cancelled() => {
                    this.abandon(&session_key, &handle, ExchangeOutcome::Cancelled);
                    return;
                }
                None => match this.ensure_session(&session_key).await {
                    Ok(session) => session,
                    Err(err) => {
                        this.publish(SessionEvent::Error {
                            session_key: session_key.clone(),
                            message: format!("{err:#}"),
                        });
                        this.abandon(&session_key, &handle, ExchangeOutcome::Failed);
                        return;
                    }
                },
            };
            this.run_exchange(session, handle).await;
        });
    }

    /// Finish a channel that never got an exchange.
    fn abandon(&self, session_key: &str, handle: &ChannelHandle, outcome: ExchangeOutcome) {
        let unread = self.channels.release(session_key, handle.generation);
        if !unread.is_empty() {
            tracing::warn!(session_key, dropped = unread.len(), "exchange not started, input dropped");
        }
        self.publish(SessionEvent::Completed {
            session_key: session_key.to_string(),
            outcome,
        });
    }

    async fn run_exchange(self, session: Session, handle: ChannelHandle) {
        let session_key = session.key.clone();
        let mut guard = ExchangeGuard {
            channels: Arc::clone(&self.channels),
            events: self.events.clone(),
            session_key: session_key.clone(),
            generation: handle.generation,
            outcome: ExchangeOutcome::Failed,
        };

        tracing::info!(
            session_key = %session_key,
            resume = session.resume_token.as_deref().unwrap_or("-"),
            mode = %session.permission_mode,
            "exchange starting"
        );
        self.record_liveness(&session_key).await;

        let outcome = match self.consume(&session, &handle).await {
            Ok(outcome) => outcome,
            Err(err) if handle.cancel.is_cancelled() => {
                tracing::debug!(session_key = %session_key, error = %err, "exchange failed after cancellation");
                ExchangeOutcome::Cancelled
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(session_key = %session_key, error = %message, "exchange failed");
                self.publish(SessionEvent::Error {
                    session_key: session_key.clone(),
                    message,
                });
                ExchangeOutcome::Failed
            }
        };

        // Release before the next await so input arriving during teardown
        // opens a new channel
        let successor = if outcome == ExchangeOutcome::Completed && !handle.cancel.is_cancelled() {
            self.channels.hand_over(&session_key, handle.generation)
        } else {
            let unread = self.channels.release(&session_key, handle.generation);
            if !unread.is_empty() {
                tracing::info!(session_key = %session_key, dropped = unread.len(), ?outcome, "unread input discarded");
            }
            None
        };

        self.record_liveness(&session_key).await;
        tracing::info!(session_key = %session_key, ?outcome, "exchange finished");
        guard.outcome = outcome;
        drop(guard);

        if let Some(handle) = successor {
            self.spawn_exchange(&session_key, None, handle);
        }
    }

    async fn consume(&self, session: &Session, handle: &ChannelHandle) -> Result<ExchangeOutcome> {
        let session_key = session.key.as_str();
        let request = QueryRequest {
            session_key: session_key.to_string(),
            options: self.exchange_options(session),
            input: handle.input.clone(),
            authorizer: Arc::new(SessionAuthorizer::new(
                Arc::clone(&self.permissions),
                session_key,
            )),
            cancel: handle.cancel.clone(),
        };

        let mut messages = tokio::select! {
            biased;
            () = handle.cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
            started = self.agent.query(request) => started.context("Failed to start agent")?,
        };

        let mut known_token = session.resume_token.clone();
        loop {
            let next = tokio::select! {
                biased;
                () = handle.cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
                next = messages.recv() => next,
            };

            match next {
                None => return Ok(ExchangeOutcome::Completed),
                Some(Err(err)) => return Err(err),
                Some(Ok(message)) => {
                    self.handle_message(session_key, message, &mut known_token)
                        .await;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        session_key: &str,
        message: AgentMessage,
        known_token: &mut Option<String>,
    ) {
        if let Some(token) = message.session_id() {
            if known_token.as_deref() != Some(token) {
                self.persist_resume_token(session_key, token).await;
                *known_token = Some(token.to_string());
            }
        }

        let tool = extract_tool_info(&message, &self.settings.interesting_tools);
        if let Some(info) = tool.as_ref().filter(|info| info.is_tool_use) {
            if let Err(err) = self
                .store
                .record_tool_name(&info.tool_id, &info.tool_name)
                .await
            {
                tracing::warn!(session_key, tool_id = %info.tool_id, error = %err, "failed to record tool name");
            }
        }

        let parent_id = message.parent_tool_use_id().map(String::from);
        self.publish(SessionEvent::Response {
            session_key: session_key.to_string(),
            message,
            tool,
            parent_id,
        });
    }

    async fn persist_resume_token(&self, session_key: &str, token: &str) {
        let _lock = self.records.lock().await;
        let session = match self.store.get(session_key).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!(session_key, "session record missing, resumption token not saved");
                return;
            }
            Err(err) => {
                tracing::warn!(session_key, error = %err, "failed to load session");
                return;
            }
        };

        if session.resume_token.as_deref() == Some(token) {
            return;
        }

        let mut session = session;
        session.resume_token = Some(token.to_string());
        session.touch();
        match self.store.save(&session).await {
            Ok(()) => tracing::debug!(session_key, token, "resumption token updated"),
            Err(err) => tracing::warn!(session_key, error = %err, "failed to save resumption token"),
        }
    }

    /// Mirror the channel registry into the record's liveness flag.
    async fn record_liveness(&self, session_key: &str) {
        let channels = Arc::clone(&self.channels);
        let key = session_key.to_string();
        match self
            .update_session(session_key, move |session| {
                session.is_active = channels.is_active(&key);
            })
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::debug!(session_key, "session record missing, liveness not saved"),
            Err(err) => tracing::warn!(session_key, error = %err, "failed to save session liveness"),
        }
    }
}

/// Releases the channel and publishes completion however the exchange task ends.
struct ExchangeGuard {
    channels: Arc<StreamChannels>,
    events: mpsc::UnboundedSender<SessionEvent>,
    session_key: String,
    generation: u64,
    outcome: ExchangeOutcome,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        let _ = self.channels.release(&self.session_key, self.generation);
        let _ = self.events.send(SessionEvent::Completed {
            session_key: std::mem::take(&mut self.session_key),
            outcome: self.outcome,
        });
    }
}
