use std::path::{Path, PathBuf};

use council_core::LogEntry;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{DbError, Result};

const LOG_EXTENSION: &str = "jsonl";

/// Append-only JSON Lines log, one file per session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("sessions"),
        }
    }

    pub fn path(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", session_id, LOG_EXTENSION))
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }

    /// Append one entry and flush it to disk before returning.
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(entry.session_id))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        Ok(())
    }

    /// Read every entry in file order.
    ///
    /// A final line without a terminating newline is the remains of an
    /// interrupted append: it is cut off the file and ignored.
    pub async fn read_all(&self, session_id: Uuid) -> Result<Vec<LogEntry>> {
        let path = self.path(session_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DbError::SessionNotFound(session_id));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut valid_len = 0usize;

        for (index, line) in content.split_inclusive('\n').enumerate() {
            if !line.ends_with('\n') {
                tracing::warn!(
                    session_id = %session_id,
                    line = index + 1,
                    "Dropping torn trailing log line"
                );
                let file = OpenOptions::new().write(true).open(&path).await?;
                file.set_len(valid_len as u64).await?;
                file.sync_data().await?;
                break;
            }
            valid_len += line.len();

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry: LogEntry =
                serde_json::from_str(trimmed).map_err(|e| DbError::CorruptLog {
                    session_id,
                    line: index + 1,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Move a session's log out of the live set. The entries are kept as-is.
    pub async fn archive(&self, session_id: Uuid) -> Result<PathBuf> {
        let source = self.path(session_id);
        if !fs::try_exists(&source).await? {
            return Err(DbError::SessionNotFound(session_id));
        }

        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir).await?;
        let target = archive_dir.join(format!("{}.{}", session_id, LOG_EXTENSION));
        fs::rename(&source, &target).await?;

        tracing::info!(session_id = %session_id, path = %target.display(), "Archived session log");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_core::{LogDraft, LogRecord};

    fn entry(session_id: Uuid, seq: u64) -> LogEntry {
        LogDraft::engine(LogRecord::Commentary {
            text: format!("line {}", seq),
        })
        .into_entry(session_id, seq)
    }

    #[tokio::test]
    async fn test_append_and_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path());
        let id = Uuid::new_v4();

        let written: Vec<_> = (1..=3).map(|seq| entry(id, seq)).collect();
        for e in &written {
            log.append(e).await.unwrap();
        }

        let entries = log.read_all(id).await.unwrap();
        assert_eq!(entries, written);

        let raw = std::fs::read_to_string(log.path(id)).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_missing_log_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path());

        let err = log.read_all(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DbError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path());
        let id = Uuid::new_v4();

        log.append(&entry(id, 1)).await.unwrap();
        let mut raw = std::fs::read_to_string(log.path(id)).unwrap();
        raw.push_str(r#"{"seq":2,"timest"#);
        std::fs::write(log.path(id), &raw).unwrap();

        assert_eq!(log.read_all(id).await.unwrap().len(), 1);

        log.append(&entry(id, 2)).await.unwrap();
        let entries = log.read_all(id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].seq, 2);
    }

    #[tokio::test]
    async fn test_garbage_line_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path());
        let id = Uuid::new_v4();

        log.append(&entry(id, 1)).await.unwrap();
        let mut raw = std::fs::read_to_string(log.path(id)).unwrap();
        raw.push_str("not json\n");
        std::fs::write(log.path(id), &raw).unwrap();

        let err = log.read_all(id).await.unwrap_err();
        assert!(matches!(err, DbError::CorruptLog { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_archive_moves_only_that_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        log.append(&entry(a, 1)).await.unwrap();
        log.append(&entry(b, 1)).await.unwrap();

        let archived = log.archive(a).await.unwrap();
        assert!(archived.exists());
        assert!(!log.path(a).exists());
        assert!(log.path(b).exists());
        assert!(matches!(
            log.read_all(a).await,
            Err(DbError::SessionNotFound(_))
        ));
        assert!(matches!(
            log.archive(a).await,
            Err(DbError::SessionNotFound(id)) if id == a
        ));
    }
}
