//! Interaction Recorder
//!
//! Every completed interaction is appended to a per-agent behavior log so it
//! can be replayed or analysed later. Records are never rewritten.
//!
//! On disk the log lives at `<root>/agents/<name>/behavior.json` and holds
//! one JSON record per line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::RecorderError;
use crate::message::{Message, ToolCallRequest, ToolCallResult};

/// One tool invocation as it appears in a behavior record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolCall {
    pub name: String,
    pub args: Map<String, Value>,
    pub result: Value,
    #[serde(rename = "timingMS")]
    pub timing_ms: u64,
}

impl RecordedToolCall {
    pub fn new(request: &ToolCallRequest, result: &ToolCallResult) -> Self {
        Self {
            name: request.name.clone(),
            args: request.arguments.clone(),
            result: result.outcome.to_value(),
            timing_ms: u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub model: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordMetadata {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            extra: Map::new(),
        }
    }
}

/// The persisted document for one completed interaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub agent: String,
    pub task: String,
    pub timestamp: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<RecordedToolCall>,
    pub metadata: RecordMetadata,
}

/// Durable sink for interaction records
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Append one record. Concurrent calls for the same agent must not
    /// interleave.
    async fn record(&self, record: &InteractionRecord) -> Result<(), RecorderError>;
}

fn check_identity(agent: &str) -> Result<(), RecorderError> {
    let bad = agent.is_empty()
        || agent == "."
        || agent == ".."
        || agent.contains(['/', '\\', '\0']);
    if bad {
        return Err(RecorderError::InvalidIdentity(agent.to_string()));
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RecorderError + '_ {
    move |source| RecorderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

type WriteLocks = std::sync::Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>;

/// Write locks shared by every `FileRecorder` in the process, keyed by log
/// path. Entries are weak so a log nobody is writing holds no lock.
fn write_locks() -> &'static WriteLocks {
    static LOCKS: OnceLock<WriteLocks> = OnceLock::new();
    LOCKS.get_or_init(Default::default)
}

/// Lock guarding appends to `path`
fn write_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = write_locks().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
        return lock;
    }

    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(path.to_path_buf(), Arc::downgrade(&lock));
    lock
}

/// Appends JSON Lines to `<root>/agents/<name>/behavior.json`.
///
/// Appends to one log are serialised across every recorder in the process
/// that resolves to the same path, so separately built agents may share a
/// root. Roots are compared as given, not canonicalised.
pub struct FileRecorder {
    root: PathBuf,
}

impl FileRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the behavior log for `agent`
    pub fn path_for(&self, agent: &str) -> Result<PathBuf, RecorderError> {
        check_identity(agent)?;
        Ok(self.root.join("agents").join(agent).join("behavior.json"))
    }

    /// Read back every record stored for `agent`, oldest first
    pub async fn load(&self, agent: &str) -> Result<Vec<InteractionRecord>, RecorderError> {
        let path = self.path_for(agent)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path)(e)),
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(RecorderError::from))
            .collect()
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn record(&self, record: &InteractionRecord) -> Result<(), RecorderError> {
        let path = self.path_for(&record.agent)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let lock = write_lock(&path);
        let _guard = lock.lock().await;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        file.write_all(&line).await.map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))?;

        tracing::debug!(agent = %record.agent, path = %path.display(), "Recorded interaction");
        Ok(())
    }
}

/// In-memory recorder (for embedding and testing)
#[derive(Default)]
pub struct MemoryRecorder {
    records: RwLock<HashMap<String, Vec<InteractionRecord>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, agent: &str) -> Vec<InteractionRecord> {
        self.records.read().await.get(agent).cloned().unwrap_or_default()
    }

    pub async fn total(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn record(&self, record: &InteractionRecord) -> Result<(), RecorderError> {
        check_identity(&record.agent)?;
        self.records
            .write()
            .await
            .entry(record.agent.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}
