use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::timestamp_to_datetime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionEventRow {
    pub id: i64,
    pub session_id: String,
    pub seq: i64,
    pub event_type: String,
    pub data: String,
    pub created_at: i64,
}

/// A persisted progress event, stored as the serialized envelope
#[derive(Debug, Clone)]
pub struct SessionEventRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub seq: u64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SessionEventRow {
    pub fn into_domain(self) -> SessionEventRecord {
        SessionEventRecord {
            id: self.id,
            session_id: Uuid::parse_str(&self.session_id).unwrap_or_default(),
            seq: self.seq.max(0) as u64,
            event_type: self.event_type,
            data: serde_json::from_str(&self.data).unwrap_or(serde_json::Value::Null),
            created_at: timestamp_to_datetime(self.created_at),
        }
    }
}

/// Input for persisting a published event
#[derive(Debug, Clone)]
pub struct CreateSessionEvent {
    pub session_id: Uuid,
    pub seq: u64,
    pub event_type: String,
    pub data: serde_json::Value,
}

impl CreateSessionEvent {
    pub fn new(
        session_id: Uuid,
        seq: u64,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            seq,
            event_type: event_type.into(),
            data,
        }
    }
}
