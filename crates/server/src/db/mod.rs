use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod peer_store;
pub mod traffic;

pub use peer_store::{PeerRecord, PeerStore, RemoveOutcome};
pub use traffic::{CumulativeTotals, TrafficAccountant, TrafficRecord, TrafficSnapshot};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Blocking store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replaces `path` with `bytes` via a temp file in the same directory, so a
/// reader sees either the old or the new content, never a torn write.
pub(crate) async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&bytes).map_err(|e| StoreError::io(&path, e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Reads a file, mapping "not found" to `None`.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
