use chrono::{DateTime, Utc};
use council_core::{Session, SessionStatus, Stage};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub session_id: String,
    pub last_seq: i64,
    pub stage: String,
    pub status: String,
    pub data: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SnapshotRow {
    pub fn from_session(session: &Session) -> Result<Self, serde_json::Error> {
        Ok(Self {
            session_id: session.id.to_string(),
            last_seq: session.last_seq as i64,
            stage: session.current_stage.as_str().to_string(),
            status: session.status.as_str().to_string(),
            data: serde_json::to_string(session)?,
            created_at: datetime_to_timestamp(session.created_at),
            updated_at: datetime_to_timestamp(session.updated_at),
        })
    }

    pub fn into_session(self) -> Result<Session, serde_json::Error> {
        serde_json::from_str(&self.data)
    }

    pub fn into_summary(self) -> SnapshotSummary {
        SnapshotSummary {
            session_id: Uuid::parse_str(&self.session_id).unwrap_or_default(),
            last_seq: self.last_seq.max(0) as u64,
            stage: Stage::parse(&self.stage).unwrap_or_default(),
            status: SessionStatus::parse(&self.status).unwrap_or_default(),
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        }
    }
}

/// Listing view of a snapshot without the serialized session body
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub session_id: Uuid,
    pub last_seq: u64,
    pub stage: Stage,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
