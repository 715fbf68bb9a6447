//! Persisted session state
//!
//! The orchestrator reads and writes one `Session` record per session key,
//! plus a small map from tool invocation id to tool name that lets a
//! tool-result be labelled even when its tool-use was never seen locally.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claude::permissions::PermissionMode;
use crate::error::StoreError;

/// Tool name entries kept before the oldest are evicted.
pub const TOOL_NAME_CAPACITY: usize = 1024;

/// One chat's conversation with the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable per-chat key
    pub key: String,
    /// Agent session id to resume; absent until the agent assigns one
    #[serde(default)]
    pub resume_token: Option<String>,
    /// Working directory for exchanges
    pub working_dir: PathBuf,
    /// Tool approval policy
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// An exchange is running
    #[serde(default)]
    pub is_active: bool,
    /// Last time input arrived or the record changed
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// A fresh session with no resumption token.
    pub fn new(key: &str, working_dir: impl Into<PathBuf>, permission_mode: PermissionMode) -> Self {
        Self {
            key: key.to_string(),
            resume_token: None,
            working_dir: working_dir.into(),
            permission_mode,
            is_active: false,
            last_activity: Utc::now(),
        }
    }

    /// Bump the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Storage for session records and the tool-name side lookup.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. `Ok(None)` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Session>>;

    /// Create or overwrite a session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Remove a session. Missing sessions are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remember the tool name for an invocation id.
    async fn record_tool_name(&self, tool_id: &str, tool_name: &str) -> Result<()>;

    /// Look up the tool name for an invocation id.
    async fn tool_name(&self, tool_id: &str) -> Result<Option<String>>;
}

/// Bounded invocation id → tool name map with FIFO eviction.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ToolNames {
    order: VecDeque<String>,
    names: HashMap<String, String>,
}

impl ToolNames {
    fn insert(&mut self, tool_id: &str, tool_name: &str) {
        if self
            .names
            .insert(tool_id.to_string(), tool_name.to_string())
            .is_none()
        {
            self.order.push_back(tool_id.to_string());
        }
        while self.order.len() > TOOL_NAME_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.names.remove(&oldest);
            }
        }
    }

    fn get(&self, tool_id: &str) -> Option<String> {
        self.names.get(tool_id).cloned()
    }
}

/// In-process store. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    tool_names: Mutex<ToolNames>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(key).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(key);
        Ok(())
    }

    async fn record_tool_name(&self, tool_id: &str, tool_name: &str) -> Result<()> {
        self.tool_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_id, tool_name);
        Ok(())
    }

    async fn tool_name(&self, tool_id: &str) -> Result<Option<String>> {
        Ok(self
            .tool_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_id))
    }
}

/// Store that keeps one JSON file per session in a directory.
///
/// Layout: `<dir>/<escaped key>.json` per session and
/// `<dir>/.tool_names.json` for the side lookup. Escaped keys never contain
/// `.`, so no session can map onto the lookup file.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    tool_names: tokio::sync::Mutex<()>,
}

const TOOL_NAMES_FILE: &str = ".tool_names.json";

impl FileSessionStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io("creating store directory", &dir, e))?;
        Ok(Self {
            dir,
            tool_names: tokio::sync::Mutex::new(()),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("reading", path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_json<T: Serialize>(path: &Path, what: &'static str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|source| StoreError::Serialize { what, source })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io("replacing", path, e))
    }
}

/// Make a session key safe to use as a file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`, so distinct keys never share a file.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<Session>> {
        Ok(Self::read_json(&self.session_path(key)).await?)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        Self::write_json(&self.session_path(&session.key), "session", session).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.session_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("deleting session", path, e).into()),
        }
    }

    async fn record_tool_name(&self, tool_id: &str, tool_name: &str) -> Result<()> {
        let _guard = self.tool_names.lock().await;
        let path = self.dir.join(TOOL_NAMES_FILE);
        let mut names: ToolNames = Self::read_json(&path).await?.unwrap_or_default();
        names.insert(tool_id, tool_name);
        Self::write_json(&path, "tool names", &names).await?;
        Ok(())
    }

    async fn tool_name(&self, tool_id: &str) -> Result<Option<String>> {
        let _guard = self.tool_names.lock().await;
        let path = self.dir.join(TOOL_NAMES_FILE);
        let names: Option<ToolNames> = Self::read_json(&path).await?;
        Ok(names.and_then(|n| n.get(tool_id)))
    }
}
