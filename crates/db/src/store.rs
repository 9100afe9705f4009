use council_core::{LogEntry, Session};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::log::SessionLog;
use crate::models::SnapshotSummary;
use crate::repositories::{EventRepository, SnapshotRepository};

/// Log plus snapshots: the durable side of a session.
///
/// The log is authoritative. A snapshot is only trusted when the log entry
/// at the snapshot's sequence number reports the same stage.
#[derive(Clone)]
pub struct SessionStore {
    log: SessionLog,
    snapshots: SnapshotRepository,
    events: EventRepository,
}

impl SessionStore {
    pub fn new(log: SessionLog, snapshots: SnapshotRepository, events: EventRepository) -> Self {
        Self {
            log,
            snapshots,
            events,
        }
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }

    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        self.log.append(entry).await
    }

    pub async fn read_all(&self, session_id: Uuid) -> Result<Vec<LogEntry>> {
        self.log.read_all(session_id).await
    }

    pub async fn snapshot(&self, session: &Session) -> Result<()> {
        self.snapshots.upsert(session).await?;
        tracing::debug!(
            session_id = %session.id,
            seq = session.last_seq,
            stage = %session.current_stage,
            "Snapshot written"
        );
        Ok(())
    }

    /// Restore a session from its snapshot and the log entries after it.
    pub async fn load(&self, session_id: Uuid) -> Result<Session> {
        let entries = self.log.read_all(session_id).await?;
        check_contiguous(session_id, &entries)?;

        let Some(snapshot) = self.snapshots.find_by_id(session_id).await? else {
            return replay(session_id, &entries);
        };

        let anchor = snapshot
            .last_seq
            .checked_sub(1)
            .and_then(|i| entries.get(i as usize))
            .ok_or_else(|| DbError::CorruptState {
                session_id,
                message: format!(
                    "snapshot at seq {} but log ends at seq {}",
                    snapshot.last_seq,
                    entries.len()
                ),
            })?;
        if anchor.stage != snapshot.current_stage {
            return Err(DbError::CorruptState {
                session_id,
                message: format!(
                    "snapshot stage {} but log stage {} at seq {}",
                    snapshot.current_stage, anchor.stage, anchor.seq
                ),
            });
        }

        let mut session = snapshot;
        for entry in &entries[session.last_seq as usize..] {
            session.apply(entry).map_err(|e| DbError::CorruptState {
                session_id,
                message: e.to_string(),
            })?;
        }

        Ok(session)
    }

    /// Rebuild a session from an empty state using the log alone.
    pub async fn replay(&self, session_id: Uuid) -> Result<Session> {
        let entries = self.log.read_all(session_id).await?;
        check_contiguous(session_id, &entries)?;
        replay(session_id, &entries)
    }

    pub async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        self.snapshots.find_all().await
    }

    /// Retire a session: its log is archived, never rewritten.
    pub async fn remove(&self, session_id: Uuid) -> Result<()> {
        self.log.archive(session_id).await?;
        self.snapshots.delete(session_id).await?;
        self.events.delete_by_session_id(session_id).await?;
        Ok(())
    }
}

fn check_contiguous(session_id: Uuid, entries: &[LogEntry]) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        let expected = index as u64 + 1;
        if entry.seq != expected || entry.session_id != session_id {
            return Err(DbError::CorruptLog {
                session_id,
                line: index + 1,
                message: format!("expected seq {}, found {}", expected, entry.seq),
            });
        }
    }
    Ok(())
}

fn replay(session_id: Uuid, entries: &[LogEntry]) -> Result<Session> {
    Session::replay(entries).map_err(|e| DbError::CorruptState {
        session_id,
        message: e.to_string(),
    })
}
