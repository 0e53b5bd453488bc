use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use common::{Error, Result};

use crate::SessionStore;

/// SQLite-backed session store. Last writer wins; there is no versioning.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(db: &SqlitePool) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(db)
            .await
            .map_err(|e| Error::Database(e.into()))?;
        info!("Session store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM trading_sessions WHERE storage_key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(payload)
    }

    async fn write(&self, key: &str, payload: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_sessions (storage_key, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(storage_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM trading_sessions WHERE storage_key = ?1")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
