//! Durable conversation log. Append-only JSONL, one record per persisted
//! session, grounded on the same fsync-then-rename-free append pattern the
//! teacher uses for its memory event log — here simplified to a straight
//! append since each record is self-contained and never rewritten in place.
//!
//! `ConversationManager::save_and_reset` calls [`ConversationLog::save`]
//! synchronously and must never block on I/O. [`JsonlConversationLog`]
//! satisfies that by handing the record to a single background worker task
//! over an unbounded channel; the worker serializes writes so concurrent
//! callers never interleave partial lines.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use npc_conversation::{ConversationLog, Role, Turn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredTurn {
    role: String,
    content: String,
}

impl From<&Turn> for StoredTurn {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self { role: role.to_string(), content: turn.content.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub saved_at: DateTime<Utc>,
    pub reason: String,
    turns: Vec<StoredTurn>,
}

/// A [`ConversationLog`] that appends each saved session as one JSONL line.
#[derive(Debug, Clone)]
pub struct JsonlConversationLog {
    tx: mpsc::UnboundedSender<ConversationRecord>,
}

impl JsonlConversationLog {
    /// Spawns the background writer task and returns a handle. `path` is
    /// created (along with its parent directories) on first write.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversationRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = append_record(&path, &record).await {
                    tracing::warn!(error = %err, path = %path.display(), "failed to persist conversation record");
                }
            }
        });
        Self { tx }
    }
}

impl ConversationLog for JsonlConversationLog {
    fn save(&self, turns: Vec<Turn>, reason: &str) {
        let record = ConversationRecord {
            saved_at: Utc::now(),
            reason: reason.to_string(),
            turns: turns.iter().map(StoredTurn::from).collect(),
        };
        if self.tx.send(record).is_err() {
            tracing::warn!("conversation log worker has shut down; dropping record");
        }
    }
}

async fn append_record(path: &Path, record: &ConversationRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    let line = serde_json::to_string(record)?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Loads every persisted record from `path` in append order. An absent file
/// is treated as an empty log.
pub async fn load_all(path: impl AsRef<Path>) -> anyhow::Result<Vec<ConversationRecord>> {
    let path = path.as_ref();
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Vec::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ConversationRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(line = line_idx + 1, error = %err, path = %path.display(), "skipping corrupt conversation log line");
            }
        }
    }
    Ok(records)
}
