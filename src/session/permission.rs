//! Human-in-the-loop tool approval
//!
//! `PermissionCoordinator::authorize` turns the agent's "may I run this
//! tool" callback into a wait on a remote decision. Each request gets an
//! opaque id; the chat transport shows approve/deny actions carrying that id
//! and calls `settle` when the human answers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::agent::Authorizer;
use crate::claude::permissions::PermissionDecision;

/// Denial reason shown to the model when the human says no.
pub const USER_DENIED_MESSAGE: &str = "The user denied this tool use";

/// Approval prompt sent to the chat transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequest {
    /// Correlates the human's answer with this request
    pub request_id: String,
    /// Session asking
    pub session_key: String,
    /// Tool to run
    pub tool_name: String,
    /// Proposed tool input
    pub input: Value,
}

/// Delivers approval prompts to the human.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    /// Show the prompt. An error means the human never saw it.
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()>;
}

/// Read-only view of an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    /// Request id
    pub request_id: String,
    /// Owning session
    pub session_key: String,
    /// Tool awaiting approval
    pub tool_name: String,
    /// When the request was raised
    pub created_at: DateTime<Utc>,
}

struct PendingPermission {
    session_key: String,
    tool_name: String,
    input: Value,
    created_at: DateTime<Utc>,
    settle: oneshot::Sender<PermissionDecision>,
}

/// Table of outstanding approval requests.
pub struct PermissionCoordinator {
    notifier: Arc<dyn ApprovalNotifier>,
    pending: Mutex<HashMap<String, PendingPermission>>,
    timeout: Option<Duration>,
}

impl PermissionCoordinator {
    /// Create a coordinator that waits indefinitely for decisions.
    pub fn new(notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self {
            notifier,
            pending: Mutex::new(HashMap::new()),
            timeout: None,
        }
    }

    /// Deny requests that stay unanswered longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingPermission>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, request_id: &str) -> Option<PendingPermission> {
        self.table().remove(request_id)
    }

    /// Ask the human whether `tool_name` may run, and wait for the answer.
    ///
    /// Always returns a decision: notifier failures, timeouts and dropped
    /// requests all become denials.
    pub async fn authorize(
        &self,
        session_key: &str,
        tool_name: &str,
        input: Value,
    ) -> PermissionDecision {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.table().insert(
            request_id.clone(),
            PendingPermission {
                session_key: session_key.to_string(),
                tool_name: tool_name.to_string(),
                input: input.clone(),
                created_at: Utc::now(),
                settle: tx,
            },
        );

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            session_key: session_key.to_string(),
            tool_name: tool_name.to_string(),
            input,
        };

        if let Err(err) = self.notifier.request_approval(&request).await {
            self.take(&request_id);
            tracing::warn!(session_key, request_id = %request_id, tool_name, error = %err, "approval request could not be delivered");
            return PermissionDecision::deny(format!("Failed to request approval: {err:#}"));
        }

        tracing::debug!(session_key, request_id = %request_id, tool_name, "awaiting approval");
        self.wait(&request_id, rx).await
    }

    async fn wait(
        &self,
        request_id: &str,
        mut rx: oneshot::Receiver<PermissionDecision>,
    ) -> PermissionDecision {
        let settled = match self.timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await.ok() {
                Some(settled) => settled,
                None => {
                    if self.take(request_id).is_some() {
                        tracing::info!(request_id, "approval request timed out");
                        return PermissionDecision::deny(format!(
                            "Approval request timed out after {}s",
                            limit.as_secs()
                        ));
                    }
                    // Settled between the deadline and the removal
                    rx.await
                }
            },
        };

        settled.unwrap_or_else(|_| {
            PermissionDecision::deny("Approval request was dropped before a decision arrived")
        })
    }

    /// Resolve a request with the human's answer.
    ///
    /// Returns `false` for unknown, expired or already-settled ids.
    pub fn settle(&self, request_id: &str, approved: bool) -> bool {
        let Some(pending) = self.take(request_id) else {
            tracing::debug!(request_id, "settlement for unknown request ignored");
            return false;
        };

        let decision = if approved {
            PermissionDecision::Allow {
                updated_input: pending.input,
            }
        } else {
            PermissionDecision::deny(USER_DENIED_MESSAGE)
        };

        tracing::debug!(
            request_id,
            session_key = %pending.session_key,
            tool_name = %pending.tool_name,
            approved,
            "approval settled"
        );
        if pending.settle.send(decision).is_err() {
            tracing::debug!(request_id, "authorize call no longer waiting");
        }
        true
    }

    /// Deny every outstanding request of one session. Returns how many.
    pub fn deny_session(&self, session_key: &str, reason: &str) -> usize {
        let drained: Vec<(String, PendingPermission)> = {
            let mut table = self.table();
            let ids: Vec<String> = table
                .iter()
                .filter(|(_, p)| p.session_key == session_key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| table.remove(&id).map(|pending| (id, pending)))
                .collect()
        };

        let count = drained.len();
        for (request_id, pending) in drained {
            tracing::debug!(
                session_key,
                request_id = %request_id,
                tool_name = %pending.tool_name,
                "approval denied for session"
            );
            if pending.settle.send(PermissionDecision::deny(reason)).is_err() {
                tracing::debug!(request_id = %request_id, "authorize call no longer waiting");
            }
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Outstanding requests for one session, oldest first.
    #[must_use]
    pub fn pending_for(&self, session_key: &str) -> Vec<PendingSummary> {
        let mut summaries: Vec<PendingSummary> = self
            .table()
            .iter()
            .filter(|(_, p)| p.session_key == session_key)
            .map(|(id, p)| PendingSummary {
                request_id: id.clone(),
                session_key: p.session_key.clone(),
                tool_name: p.tool_name.clone(),
                created_at: p.created_at,
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }
}

/// `Authorizer` bound to one session, handed to the agent per exchange.
pub struct SessionAuthorizer {
    coordinator: Arc<PermissionCoordinator>,
    session_key: String,
}

impl SessionAuthorizer {
    /// Bind `coordinator` to `session_key`.
    pub fn new(coordinator: Arc<PermissionCoordinator>, session_key: &str) -> Self {
        Self {
            coordinator,
            session_key: session_key.to_string(),
        }
    }
}

#[async_trait]
impl Authorizer for SessionAuthorizer {
    async fn authorize(&self, tool_name: &str, input: Value) -> PermissionDecision {
        self.coordinator
            .authorize(&self.session_key, tool_name, input)
            .await
    }
}
