use crate::error::DbError;
use crate::models::{SnapshotRow, SnapshotSummary};
use council_core::Session;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the snapshot for `session`.
    pub async fn upsert(&self, session: &Session) -> Result<(), DbError> {
        let row = SnapshotRow::from_session(session)?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (session_id, last_seq, stage, status, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                last_seq = excluded.last_seq,
                stage = excluded.stage,
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.session_id)
        .bind(row.last_seq)
        .bind(&row.stage)
        .bind(&row.status)
        .bind(&row.data)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, session_id: Uuid) -> Result<Option<Session>, DbError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT session_id, last_seq, stage, status, data, created_at, updated_at
            FROM snapshots
            WHERE session_id = ?
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_session()?)),
            None => Ok(None),
        }
    }

    pub async fn find_all(&self) -> Result<Vec<SnapshotSummary>, DbError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT session_id, last_seq, stage, status, data, created_at, updated_at
            FROM snapshots
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_summary()).collect())
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use council_core::{LogDraft, LogRecord, Persona, SessionConfig, Stage};

    fn started_session() -> Session {
        let config = SessionConfig::default();
        let bindings = (1..=config.worker_count)
            .map(|i| Persona::new(format!("p{}", i), format!("Persona {}", i), "Think."))
            .collect();
        let entry = LogDraft::engine(LogRecord::SessionStarted {
            prompt: "Pick a database".to_string(),
            config,
            bindings,
        })
        .into_entry(Uuid::new_v4(), 1);
        Session::start(&entry).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let (_dir, pool) = test_pool().await;
        let repo = SnapshotRepository::new(pool);
        let mut session = started_session();

        repo.upsert(&session).await.unwrap();
        session.current_stage = Stage::Questions;
        session.last_seq = 4;
        repo.upsert(&session).await.unwrap();

        let found = repo.find_by_id(session.id).await.unwrap().unwrap();
        assert_eq!(found, session);

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stage, Stage::Questions);
        assert_eq!(all[0].last_seq, 4);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, pool) = test_pool().await;
        let repo = SnapshotRepository::new(pool);
        let session = started_session();

        repo.upsert(&session).await.unwrap();
        assert!(repo.delete(session.id).await.unwrap());
        assert!(!repo.delete(session.id).await.unwrap());
        assert!(repo.find_by_id(session.id).await.unwrap().is_none());
    }
}
