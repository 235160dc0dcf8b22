//! Append-only JSONL journal of scaling decisions, resource snapshots and
//! tuning changes.
//!
//! One JSON object per line, each tagged with `kind` and the time it was
//! recorded. The file is never rewritten.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CanopyResult;
use crate::types::{epoch_secs, ResourceSnapshot, ScalingDecision, TuningChange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    ScalingDecision(ScalingDecision),
    ResourceSnapshot(ResourceSnapshot),
    TuningChange(TuningChange),
}

/// A single journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub recorded_at: u64,
    #[serde(flatten)]
    pub entry: JournalEntry,
}

/// Handle to an open journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl Journal {
    /// Open (or create) the journal at `path` in append mode.
    pub async fn open(path: impl AsRef<Path>) -> CanopyResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "journal opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush it.
    pub async fn append(&self, entry: JournalEntry) -> CanopyResult<()> {
        let record = JournalRecord {
            recorded_at: epoch_secs(),
            entry,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record in the journal at `path`.
    pub async fn read_all(path: impl AsRef<Path>) -> CanopyResult<Vec<JournalRecord>> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}
