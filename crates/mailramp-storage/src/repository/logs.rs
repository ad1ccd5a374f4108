//! Dispatch log repository

use crate::db::DatabasePool;
use crate::models::NewLogEntry;
use async_trait::async_trait;
use mailramp_common::{Error, Result};
use uuid::Uuid;

/// Append-only dispatch log
#[async_trait]
pub trait DispatchLogRepository: Send + Sync {
    async fn append_log(&self, entry: NewLogEntry) -> Result<()>;

    async fn append_logs(&self, entries: Vec<NewLogEntry>) -> Result<()>;
}

/// Database dispatch log repository
pub struct DbDispatchLogRepository {
    pool: DatabasePool,
}

impl DbDispatchLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DispatchLogRepository for DbDispatchLogRepository {
    async fn append_log(&self, entry: NewLogEntry) -> Result<()> {
        self.append_logs(vec![entry]).await
    }

    async fn append_logs(&self, entries: Vec<NewLogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now();
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO dispatch_logs (
                    id, campaign_id, queue_entry_id, sender_id, contact_id,
                    event, message, metadata, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(entry.campaign_id)
            .bind(entry.queue_entry_id)
            .bind(entry.sender_id)
            .bind(entry.contact_id)
            .bind(entry.event.as_str())
            .bind(&entry.message)
            .bind(&entry.metadata)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
