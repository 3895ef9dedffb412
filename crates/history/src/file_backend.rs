//! File-based history: persistent JSON-lines storage.
//!
//! Each agent gets `<dir>/<identity>.jsonl`, with the identity
//! percent-encoded so distinct identities never share a file. Each line is
//! one JSON-encoded [`Step`]. Steps are only ever appended; a torn final line
//! left by an interrupted write is cut off before the next append.
//!
//! Storage location: `~/.unison/history/` unless configured otherwise.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use unison_core::error::HistoryError;
use unison_core::history::{HistoryStore, Step};

/// A directory of per-agent JSONL files.
#[derive(Debug)]
pub struct FileHistory {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one agent's history file.
    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", urlencoding::encode(identity)))
    }
}

/// Cut a partial last line so the next append starts on a fresh line.
async fn repair_tail(file: &mut File, path: &Path) -> Result<(), HistoryError> {
    let io = |e: std::io::Error| HistoryError::Storage(format!("Failed to repair {}: {e}", path.display()));
    let len = file.metadata().await.map_err(io)?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1)).await.map_err(io)?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await.map_err(io)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let content = tokio::fs::read(path).await.map_err(io)?;
    let keep = content.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    warn!(path = %path.display(), dropped_bytes = content.len() - keep, "Truncating torn history line");
    file.set_len(keep as u64).await.map_err(io)?;
    Ok(())
}

#[async_trait]
impl HistoryStore for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, identity: &str, step: &Step) -> Result<(), HistoryError> {
        let mut line = serde_json::to_string(step)
            .map_err(|e| HistoryError::Storage(format!("Failed to serialize step: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            HistoryError::Storage(format!("Failed to create history directory: {e}"))
        })?;

        let path = self.path_for(identity);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        repair_tail(&mut file, &path).await?;
        file.seek(SeekFrom::End(0))
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to seek {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to write history: {e}")))?;
        file.flush()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to flush history: {e}")))?;

        debug!(agent = %identity, iteration = step.iteration, "Step persisted");
        Ok(())
    }

    async fn load(&self, identity: &str) -> Result<Vec<Step>, HistoryError> {
        let path = self.path_for(identity);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut steps = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Step>(line) {
                Ok(step) => steps.push(step),
                // A torn final line from an interrupted write is dropped.
                Err(e) if index + 1 == lines.len() && !content.ends_with('\n') => {
                    warn!(agent = %identity, error = %e, "Skipping truncated history line");
                }
                Err(e) => {
                    return Err(HistoryError::Corrupted {
                        identity: identity.to_string(),
                        reason: format!("line {}: {e}", index + 1),
                    });
                }
            }
        }
        Ok(steps)
    }

    async fn clear(&self, identity: &str) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::Storage(format!("Failed to remove history: {e}"))),
        }
    }
}
