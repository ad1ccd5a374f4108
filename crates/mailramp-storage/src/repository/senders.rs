//! Sender repository

use crate::db::DatabasePool;
use crate::models::{Contact, Sender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, SenderId};
use mailramp_common::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;

const SENDER_COLUMNS: &str = "s.id, s.email, s.display_name, s.daily_limit, s.emails_sent_today, \
    s.current_day, s.last_sent_at, s.counters_reset_at, s.is_active";

/// Sender repository trait
#[async_trait]
pub trait SenderRepository: Send + Sync {
    /// Reset the daily counters of every sender whose last send predates
    /// `day_start` and that has not been reset since. Returns the number of
    /// senders rolled over.
    async fn rollover_daily_counters(
        &self,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Atomically add `count` to the sender's daily counter
    async fn increment_sent(&self, sender_id: SenderId, count: i32, now: DateTime<Utc>) -> Result<()>;

    async fn get_sender(&self, id: SenderId) -> Result<Option<Sender>>;

    /// Active senders attached to a campaign
    async fn campaign_senders(&self, campaign_id: CampaignId) -> Result<Vec<Sender>>;
}

/// Database sender repository
pub struct DbSenderRepository {
    pool: DatabasePool,
}

impl DbSenderRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Decode a sender from `row`, reading columns named `{prefix}{field}` and the id from `id_column`
pub(crate) fn sender_from_row(
    row: &PgRow,
    prefix: &str,
    id_column: &str,
) -> std::result::Result<Sender, sqlx::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(Sender {
        id: row.try_get(id_column)?,
        email: row.try_get(col("email").as_str())?,
        display_name: row.try_get(col("display_name").as_str())?,
        daily_limit: row.try_get(col("daily_limit").as_str())?,
        emails_sent_today: row.try_get(col("emails_sent_today").as_str())?,
        current_day: row.try_get(col("current_day").as_str())?,
        last_sent_at: row.try_get(col("last_sent_at").as_str())?,
        counters_reset_at: row.try_get(col("counters_reset_at").as_str())?,
        is_active: row.try_get(col("is_active").as_str())?,
    })
}

/// Decode a contact from `row`, reading columns named `{prefix}{field}` and the id from `id_column`
pub(crate) fn contact_from_row(
    row: &PgRow,
    prefix: &str,
    id_column: &str,
) -> std::result::Result<Contact, sqlx::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(Contact {
        id: row.try_get(id_column)?,
        email: row.try_get(col("email").as_str())?,
        first_name: row.try_get(col("first_name").as_str())?,
        last_name: row.try_get(col("last_name").as_str())?,
        is_active: row.try_get(col("is_active").as_str())?,
    })
}

#[async_trait]
impl SenderRepository for DbSenderRepository {
    async fn rollover_daily_counters(
        &self,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE senders
            SET emails_sent_today = 0,
                current_day = current_day + 1,
                counters_reset_at = $2,
                updated_at = $2
            WHERE last_sent_at IS NOT NULL
              AND last_sent_at < $1
              AND (counters_reset_at IS NULL OR counters_reset_at <= last_sent_at)
            "#,
        )
        .bind(day_start)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn increment_sent(&self, sender_id: SenderId, count: i32, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE senders
            SET emails_sent_today = emails_sent_today + $2,
                last_sent_at = $3,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(sender_id)
        .bind(count)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_sender(&self, id: SenderId) -> Result<Option<Sender>> {
        let query = format!("SELECT {SENDER_COLUMNS} FROM senders s WHERE s.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref()
            .map(|row| sender_from_row(row, "", "id"))
            .transpose()
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn campaign_senders(&self, campaign_id: CampaignId) -> Result<Vec<Sender>> {
        let query = format!(
            r#"
            SELECT {SENDER_COLUMNS}
            FROM senders s
            JOIN campaign_senders cs ON cs.sender_id = s.id
            WHERE cs.campaign_id = $1 AND s.is_active
            ORDER BY s.email ASC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(campaign_id)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| sender_from_row(row, "", "id").map_err(|e| Error::Database(e.to_string())))
            .collect()
    }
}
