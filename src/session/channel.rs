//! Per-session stream channels
//!
//! A stream channel is the queue between "the user typed something" and
//! "the agent reads its next turn", plus the cancellation token for the
//! exchange consuming it. At most one channel is live per session key.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One user turn headed for the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// Plain text
    Text(String),
    /// Pre-built content blocks (text, images, documents)
    Blocks(Vec<Value>),
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[derive(Debug, Default)]
struct Queue {
    items: VecDeque<UserInput>,
    closed: bool,
}

#[derive(Debug, Default)]
struct SharedQueue {
    queue: Mutex<Queue>,
    ready: Notify,
}

impl SharedQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumer side of a stream channel.
///
/// Clones share one underlying queue, so each input is delivered once no
/// matter which clone reads it. The sequence ends only when the channel is
/// released.
#[derive(Debug, Clone, Default)]
pub struct InputSequence {
    shared: Arc<SharedQueue>,
}

impl InputSequence {
    fn with_items(items: Vec<UserInput>) -> Self {
        let sequence = Self::default();
        sequence.shared.lock().items.extend(items);
        sequence
    }

    /// Wait for the next input. `None` once the channel has been released.
    pub async fn next(&self) -> Option<UserInput> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.shared.lock();
                if let Some(input) = queue.items.pop_front() {
                    return Some(input);
                }
                if queue.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Whether two handles read from the same queue.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Inputs queued but not yet read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().items.len()
    }

    fn push(&self, input: UserInput) -> bool {
        {
            let mut queue = self.shared.lock();
            if queue.closed {
                return false;
            }
            queue.items.push_back(input);
        }
        self.shared.ready.notify_one();
        true
    }

    /// End the sequence and take whatever was never read.
    fn close(&self) -> Vec<UserInput> {
        let unread = {
            let mut queue = self.shared.lock();
            queue.closed = true;
            queue.items.drain(..).collect()
        };
        self.shared.ready.notify_waiters();
        unread
    }
}

/// What `get_or_create` hands back.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    /// Distinguishes this channel from later ones under the same key
    pub generation: u64,
    /// Input queue for the exchange
    pub input: InputSequence,
    /// Cancels the exchange
    pub cancel: CancellationToken,
    /// True if this call created the channel (the caller owns starting the exchange)
    pub created: bool,
}

#[derive(Debug)]
struct ChannelEntry {
    generation: u64,
    input: InputSequence,
    cancel: CancellationToken,
}

impl ChannelEntry {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn handle(&self, created: bool) -> ChannelHandle {
        ChannelHandle {
            generation: self.generation,
            input: self.input.clone(),
            cancel: self.cancel.clone(),
            created,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    channels: HashMap<String, ChannelEntry>,
    next_generation: u64,
}

impl Registry {
    fn create(&mut self, session_key: &str, input: InputSequence) -> ChannelHandle {
        self.next_generation += 1;
        let entry = ChannelEntry {
            generation: self.next_generation,
            input,
            cancel: CancellationToken::new(),
        };
        let handle = entry.handle(true);
        self.channels.insert(session_key.to_string(), entry);
        tracing::debug!(session_key, generation = handle.generation, "stream channel created");
        handle
    }

    /// Remove and close the entry if it is still `generation`.
    fn remove(&mut self, session_key: &str, generation: u64) -> Option<Vec<UserInput>> {
        if !self
            .channels
            .get(session_key)
            .is_some_and(|entry| entry.generation == generation)
        {
            return None;
        }
        let entry = self.channels.remove(session_key)?;
        tracing::debug!(session_key, generation, "stream channel released");
        Some(entry.input.close())
    }
}

/// Registry of stream channels keyed by session key.
#[derive(Debug, Default)]
pub struct StreamChannels {
    inner: Mutex<Registry>,
}

impl StreamChannels {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an input to the live channel for `session_key`.
    ///
    /// Logged and dropped if no live channel exists.
    pub fn enqueue(&self, session_key: &str, input: UserInput) {
        let registry = self.registry();
        match registry.channels.get(session_key) {
            Some(entry) if entry.is_live() => {
                if !entry.input.push(input) {
                    tracing::warn!(session_key, "stream channel closed, input dropped");
                }
            }
            _ => tracing::warn!(session_key, "no active stream channel, input dropped"),
        }
    }

    /// True iff an exchange is consuming a live channel for this key.
    #[must_use]
    pub fn is_active(&self, session_key: &str) -> bool {
        self.registry()
            .channels
            .get(session_key)
            .is_some_and(ChannelEntry::is_live)
    }

    /// Return the live channel for `session_key`, creating one if needed.
    ///
    /// While a channel is live every call returns the same input sequence
    /// and token with `created == false`. A cancelled channel that has not
    /// been released yet is replaced.
    pub fn get_or_create(&self, session_key: &str) -> ChannelHandle {
        let mut registry = self.registry();
        if let Some(entry) = registry.channels.get(session_key) {
            if entry.is_live() {
                return entry.handle(false);
            }
        }
        registry.create(session_key, InputSequence::default())
    }

    /// Cancel the live exchange for `session_key`.
    ///
    /// Returns `false` if nothing was live, including when the channel was
    /// already cancelled.
    pub fn cancel(&self, session_key: &str) -> bool {
        let registry = self.registry();
        match registry.channels.get(session_key) {
            Some(entry) if entry.is_live() => {
                entry.cancel.cancel();
                tracing::debug!(session_key, "stream channel cancelled");
                true
            }
            _ => false,
        }
    }

    /// Drop the channel once its exchange has terminated.
    ///
    /// Only removes the entry if it is still the given generation, so a
    /// finishing exchange cannot tear down its successor. Returns the
    /// inputs that were queued but never read.
    pub fn release(&self, session_key: &str, generation: u64) -> Vec<UserInput> {
        self.registry()
            .remove(session_key, generation)
            .unwrap_or_default()
    }

    /// Release the channel, moving unread input to a fresh channel.
    ///
    /// Returns the new channel's handle when input was carried over. The
    /// swap happens under one lock, so concurrent `enqueue` calls land
    /// either in the unread batch or behind it.
    pub fn hand_over(&self, session_key: &str, generation: u64) -> Option<ChannelHandle> {
        let mut registry = self.registry();
        let unread = registry.remove(session_key, generation)?;
        if unread.is_empty() {
            return None;
        }
        tracing::debug!(session_key, carried = unread.len(), "carrying unread input to a new channel");
        Some(registry.create(session_key, InputSequence::with_items(unread)))
    }

    /// Cancel every live channel.
    pub fn shutdown(&self) {
        let registry = self.registry();
        for entry in registry.channels.values() {
            entry.cancel.cancel();
        }
    }

    /// Number of live channels.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry()
            .channels
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }
}
