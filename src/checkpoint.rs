//! Checkpoint stores: where per-thread [`ExecutionState`] lives between runs.
//!
//! Stores guarantee read-after-write per thread id; concurrent saves to the
//! same id are last-writer-wins.

use crate::error::Result;
use crate::state::ExecutionState;
use crate::PipelineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Persistence for execution state, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ExecutionState>>;
    async fn save(&self, thread_id: &str, state: &ExecutionState) -> Result<()>;
    async fn delete(&self, thread_id: &str) -> Result<()>;
}

/// Process-local store. State is lost when the process exits.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: tokio::sync::RwLock<HashMap<String, ExecutionState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ExecutionState>> {
        Ok(self.data.read().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ExecutionState) -> Result<()> {
        self.data
            .write()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.data.write().await.remove(thread_id);
        Ok(())
    }
}

/// One JSON file per thread: `<dir>/<thread_id>.checkpoint.json`.
///
/// The file name keeps ASCII letters, digits, `.` and `-` of the thread id
/// and writes every other byte, `_` included, as `_XX` (uppercase hex), so
/// distinct thread ids never share a file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Checkpoint(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.json", encode_thread_id(thread_id)))
    }
}

fn encode_thread_id(thread_id: &str) -> String {
    let mut name = String::with_capacity(thread_id.len());
    for byte in thread_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{:02X}", byte));
        }
    }
    name
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ExecutionState>> {
        let path = self.path_for(thread_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::Checkpoint(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let state = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Checkpoint(format!("corrupted checkpoint {}: {}", path.display(), e))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, thread_id: &str, state: &ExecutionState) -> Result<()> {
        let path = self.path_for(thread_id);
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            PipelineError::Checkpoint(format!("cannot write {}: {}", path.display(), e))
        })
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Checkpoint(e.to_string())),
        }
    }
}
