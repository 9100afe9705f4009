use crate::error::DbError;
use crate::models::PersonaRow;
use council_core::Persona;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct PersonaRepository {
    pool: SqlitePool,
}

impl PersonaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<Persona>, DbError> {
        let rows: Vec<PersonaRow> = sqlx::query_as(
            r#"
            SELECT id, name, prompt_template, reasoning_style, tone, usage_count, win_rate
            FROM personas
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Persona>, DbError> {
        let row: Option<PersonaRow> = sqlx::query_as(
            r#"
            SELECT id, name, prompt_template, reasoning_style, tone, usage_count, win_rate
            FROM personas
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    /// Insert `persona` unless a persona with the same id exists. Returns
    /// whether a row was written; existing statistics are never overwritten.
    pub async fn seed(&self, persona: &Persona) -> Result<bool, DbError> {
        let row = PersonaRow::from(persona);
        let created_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO personas
                (id, name, prompt_template, reasoning_style, tone, usage_count, win_rate, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.prompt_template)
        .bind(&row.reasoning_style)
        .bind(&row.tone)
        .bind(row.usage_count)
        .bind(row.win_rate)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (_dir, pool) = test_pool().await;
        let repo = PersonaRepository::new(pool);

        let mut skeptic = Persona::new("skeptic", "The Skeptic", "Question every assumption.");
        skeptic.tone = "dry".to_string();
        assert!(repo.seed(&skeptic).await.unwrap());

        let renamed = Persona::new("skeptic", "Renamed", "Other.");
        assert!(!repo.seed(&renamed).await.unwrap());

        let found = repo.find_by_id("skeptic").await.unwrap().unwrap();
        assert_eq!(found, skeptic);
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_all() {
        let (_dir, pool) = test_pool().await;
        let repo = PersonaRepository::new(pool);

        for id in ["b", "a"] {
            repo.seed(&Persona::new(id, id.to_uppercase(), "x")).await.unwrap();
        }

        let ids: Vec<_> = repo
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()) && ids.contains(&"b".to_string()));
    }
}
