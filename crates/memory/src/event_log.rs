use std::fs;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::schema::{ConversationTurn, LearningEvent};

/// What a log line carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MemoryRecord {
    Turn(ConversationTurn),
    Learning(LearningEvent),
}

impl MemoryRecord {
    /// Turns partition by user, learning events by category.
    pub fn partition(&self) -> String {
        match self {
            Self::Turn(turn) => format!("user:{}", turn.user_id),
            Self::Learning(event) => format!("learning:{}", event.category().as_str()),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Turn(turn) => turn.timestamp,
            Self::Learning(event) => event.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecordEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub partition: String,
    pub record: MemoryRecord,
}

impl MemoryRecordEvent {
    pub fn new(record: MemoryRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            partition: record.partition(),
            record,
        }
    }
}

/// Append-only JSONL file holding every turn and learning event.
///
/// Every write goes through a [`LogWriter`].  Appends hold it for a single
/// line; compaction holds it from the moment it snapshots the in-memory
/// state until the rewritten file is renamed into place, so no record
/// appended in between can be dropped by the rename.
#[derive(Debug)]
pub struct MemoryEventLog {
    path: PathBuf,
    writes: Mutex<()>,
}

/// Exclusive write access to a [`MemoryEventLog`].
pub struct LogWriter<'a> {
    log: &'a MemoryEventLog,
    _guard: MutexGuard<'a, ()>,
}

fn encode_line(event: &MemoryRecordEvent) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}

impl MemoryEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "events.jsonl".to_string());
        self.path.with_file_name(format!("{filename}.{suffix}"))
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Wait for exclusive write access.
    pub async fn writer(&self) -> LogWriter<'_> {
        LogWriter {
            log: self,
            _guard: self.writes.lock().await,
        }
    }

    /// Append one record under a short-lived writer.
    pub async fn append(&self, event: &MemoryRecordEvent) -> Result<()> {
        self.writer().await.append(event).await
    }

    /// Read every record.  Lines that fail to parse are skipped and copied to
    /// a `.corrupt` sidecar.
    pub fn load(&self) -> Result<Vec<MemoryRecordEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut events = Vec::new();
        let mut corrupt_count = 0usize;

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<MemoryRecordEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    corrupt_count += 1;
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt memory record, skipping line"
                    );
                    if let Ok(mut sidecar) = fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(self.sibling("corrupt"))
                    {
                        let _ = writeln!(sidecar, "{line}");
                    }
                }
            }
        }

        if corrupt_count > 0 {
            tracing::warn!(
                corrupt_lines = corrupt_count,
                path = %self.path.display(),
                "memory log loaded with skipped lines"
            );
        }

        Ok(events)
    }
}

impl LogWriter<'_> {
    pub async fn append(&mut self, event: &MemoryRecordEvent) -> Result<()> {
        self.log.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log.path)
            .await?;
        file.write_all(&encode_line(event)?).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Copy the live log to a `.bak` sibling.  No-op when the log does not
    /// exist yet.
    pub fn backup(&self) -> Result<()> {
        if self.log.path.exists() {
            fs::copy(&self.log.path, self.log.sibling("bak"))?;
        }
        Ok(())
    }

    /// Replace the log with `events`.
    ///
    /// The new content goes to a `.tmp` sibling that is synced and then
    /// renamed over the live file, so a crash leaves either the old or the
    /// new log intact.  The `.tmp` file is removed on any error path.
    pub async fn replace(&mut self, events: &[MemoryRecordEvent]) -> Result<()> {
        self.log.ensure_parent().await?;
        let tmp_path = self.log.sibling("tmp");

        let written: Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            for event in events {
                file.write_all(&encode_line(event)?).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        let renamed = match written {
            Ok(()) => tokio::fs::rename(&tmp_path, &self.log.path)
                .await
                .map_err(anyhow::Error::from),
            Err(err) => Err(err),
        };
        if renamed.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        renamed
    }
}
