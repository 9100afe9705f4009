use crate::error::DbError;
use crate::models::{CreateSessionEvent, SessionEventRecord, SessionEventRow};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist an event. Re-publishing the same `(session_id, seq)` is a no-op.
    pub async fn create(&self, event: &CreateSessionEvent) -> Result<i64, DbError> {
        let data_json = serde_json::to_string(&event.data)?;
        let created_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO session_events (session_id, seq, event_type, data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.session_id.to_string())
        .bind(event.seq as i64)
        .bind(&event.event_type)
        .bind(&data_json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_session_id(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<SessionEventRecord>, DbError> {
        self.find_by_session_id_after(session_id, 0).await
    }

    /// Events with `seq > after_seq`, oldest first.
    pub async fn find_by_session_id_after(
        &self,
        session_id: Uuid,
        after_seq: u64,
    ) -> Result<Vec<SessionEventRecord>, DbError> {
        let rows: Vec<SessionEventRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, seq, event_type, data, created_at
            FROM session_events
            WHERE session_id = ? AND seq > ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id.to_string())
        .bind(after_seq as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn last_seq(&self, session_id: Uuid) -> Result<u64, DbError> {
        let max: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(seq) FROM session_events WHERE session_id = ?")
                .bind(session_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        Ok(max.0.unwrap_or(0).max(0) as u64)
    }

    pub async fn delete_by_session_id(&self, session_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM session_events WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
