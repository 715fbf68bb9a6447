//! Shared fixtures for integration tests: a scripted agent, a notifier that
//! forwards approval requests to the test, and a store that counts writes.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use relay::claude::cli::ExchangeOptions;
use relay::{
    parse_line, Agent, AgentMessage, ApprovalNotifier, ApprovalRequest, Authorizer,
    InputSequence, MemorySessionStore, MessageReceiver, OrchestratorSettings,
    PermissionCoordinator, PermissionDecision, QueryRequest, Session, SessionEvent,
    SessionOrchestrator, SessionStore, StreamLine, UserInput,
};

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Decode a message the way stdout lines are decoded.
pub fn message(value: &Value) -> AgentMessage {
    match parse_line(&value.to_string()) {
        Some(StreamLine::Message(message)) => message,
        other => panic!("Expected an agent message, got {other:?}"),
    }
}

pub fn system_init(session_id: &str) -> Value {
    json!({"type": "system", "subtype": "init", "session_id": session_id, "model": "test-model"})
}

pub fn assistant_text(text: &str, session_id: &str) -> Value {
    json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
        "session_id": session_id,
    })
}

pub fn tool_use(id: &str, name: &str, input: Value) -> Value {
    json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [
            {"type": "tool_use", "id": id, "name": name, "input": input}
        ]},
    })
}

pub fn tool_result(id: &str, content: &str) -> Value {
    json!({
        "type": "user",
        "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": id, "content": content}
        ]},
    })
}

/// One action of a scripted exchange.
#[derive(Clone)]
pub enum Step {
    /// Read the next user input
    AwaitInput,
    /// Emit a message
    Emit(Value),
    /// Ask the authorizer and record its decision
    Authorize { tool_name: String, input: Value },
    /// Block until the test notifies
    Wait(Arc<Notify>),
    /// End the exchange with an error
    Fail(String),
    /// Never finish on its own
    Hang,
}

/// What scripted exchanges observed.
#[derive(Default)]
pub struct ScriptLog {
    pub inputs: Mutex<Vec<UserInput>>,
    pub decisions: Mutex<Vec<PermissionDecision>>,
    pub options: Mutex<Vec<ExchangeOptions>>,
}

/// Agent that replays the same script for every exchange.
pub struct ScriptedAgent {
    script: Vec<Step>,
    queries: AtomicUsize,
    pub log: Arc<ScriptLog>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            queries: AtomicUsize::new(0),
            log: Arc::new(ScriptLog::default()),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<UserInput> {
        self.log.inputs.lock().unwrap().clone()
    }

    pub fn decisions(&self) -> Vec<PermissionDecision> {
        self.log.decisions.lock().unwrap().clone()
    }

    pub fn options(&self) -> Vec<ExchangeOptions> {
        self.log.options.lock().unwrap().clone()
    }

    /// Wait until the scripts have read `count` inputs in total.
    pub async fn wait_for_inputs(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.inputs().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for the agent to read input");
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn query(&self, request: QueryRequest) -> Result<MessageReceiver> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.log
            .options
            .lock()
            .unwrap()
            .push(request.options.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let script = self.script.clone();
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            let QueryRequest {
                input,
                authorizer,
                cancel,
                ..
            } = request;
            for step in script {
                let keep_going = tokio::select! {
                    biased;
                    () = cancel.cancelled() => false,
                    keep_going = run_step(step, &input, authorizer.as_ref(), &tx, &log) => keep_going,
                };
                if !keep_going {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

async fn run_step(
    step: Step,
    input: &InputSequence,
    authorizer: &dyn Authorizer,
    tx: &mpsc::UnboundedSender<Result<AgentMessage>>,
    log: &ScriptLog,
) -> bool {
    match step {
        Step::AwaitInput => match input.next().await {
            Some(turn) => {
                log.inputs.lock().unwrap().push(turn);
                true
            }
            None => false,
        },
        Step::Emit(value) => tx.send(Ok(message(&value))).is_ok(),
        Step::Authorize { tool_name, input } => {
            let decision = authorizer.authorize(&tool_name, input).await;
            log.decisions.lock().unwrap().push(decision);
            true
        }
        Step::Wait(notify) => {
            notify.notified().await;
            true
        }
        Step::Fail(message) => {
            let _ = tx.send(Err(anyhow!(message)));
            false
        }
        Step::Hang => {
            std::future::pending::<()>().await;
            false
        }
    }
}

/// Agent whose exchanges never start.
pub struct UnstartableAgent;

#[async_trait]
impl Agent for UnstartableAgent {
    async fn query(&self, _request: QueryRequest) -> Result<MessageReceiver> {
        bail!("binary not found")
    }
}

/// Forwards approval requests to the test.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalNotifier for ChannelNotifier {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        self.tx
            .send(request.clone())
            .map_err(|_| anyhow!("approval receiver dropped"))
    }
}

/// Memory store that counts how often the resumption token changes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemorySessionStore,
    saves: AtomicUsize,
    token_changes: AtomicUsize,
    save_delay: Duration,
}

impl CountingStore {
    /// A store whose every save takes `delay`.
    pub fn with_save_delay(delay: Duration) -> Self {
        Self {
            save_delay: delay,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn token_changes(&self) -> usize {
        self.token_changes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Session>> {
        self.inner.get(key).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        let previous = self.inner.get(&session.key).await?;
        let previous_token = previous.and_then(|s| s.resume_token);
        if previous_token != session.resume_token {
            self.token_changes.fetch_add(1, Ordering::SeqCst);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(session).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn record_tool_name(&self, tool_id: &str, tool_name: &str) -> Result<()> {
        self.inner.record_tool_name(tool_id, tool_name).await
    }

    async fn tool_name(&self, tool_id: &str) -> Result<Option<String>> {
        self.inner.tool_name(tool_id).await
    }
}

/// An orchestrator wired to test doubles.
pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub approvals: mpsc::UnboundedReceiver<ApprovalRequest>,
    pub store: Arc<CountingStore>,
    pub permissions: Arc<PermissionCoordinator>,
}

impl Harness {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self::with_store(agent, Arc::new(CountingStore::default()))
    }

    pub fn with_store(agent: Arc<dyn Agent>, store: Arc<CountingStore>) -> Self {
        let (notifier, approvals) = ChannelNotifier::new();
        let permissions = Arc::new(PermissionCoordinator::new(Arc::new(notifier)));
        let (orchestrator, events) = SessionOrchestrator::new(
            agent,
            store.clone(),
            Arc::clone(&permissions),
            OrchestratorSettings::default(),
        );
        Self {
            orchestrator,
            events,
            approvals,
            store,
            permissions,
        }
    }

    /// Next event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> SessionEvent {
        match tokio::time::timeout(WAIT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for an event"),
        }
    }

    /// Events up to and including the next completion.
    pub async fn until_complete(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches!(event, SessionEvent::Completed { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Next approval request, failing the test if none arrives in time.
    pub async fn next_approval(&mut self) -> ApprovalRequest {
        match tokio::time::timeout(WAIT, self.approvals.recv()).await {
            Ok(Some(request)) => request,
            Ok(None) => panic!("approval channel closed"),
            Err(_) => panic!("timed out waiting for an approval request"),
        }
    }
}
