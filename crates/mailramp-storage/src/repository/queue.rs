//! Email queue repository

use crate::db::DatabasePool;
use crate::models::{
    CampaignQueueCounts, DispatchCandidate, QueueEntry, RetryBackoff,
};
use crate::repository::campaigns::campaign_from_row;
use crate::repository::parse_column;
use crate::repository::senders::{contact_from_row, sender_from_row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, QueueEntryId};
use mailramp_common::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) const QUEUE_COLUMNS: &str = "q.id, q.campaign_id, q.contact_id, q.sender_id, \
    q.scheduled_for, q.status, q.sent_at, q.provider_message_id, q.error_message, \
    q.retry_count, q.priority, q.created_at, q.updated_at";

/// Queue repository trait
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Pending entries of `sending` campaigns due before `horizon`, joined with
    /// their active sender and contact. At most `per_sender_limit` entries per
    /// sender and `total_limit` overall, highest priority then oldest first.
    async fn fetch_candidates(
        &self,
        horizon: DateTime<Utc>,
        per_sender_limit: i64,
        total_limit: i64,
    ) -> Result<Vec<DispatchCandidate>>;

    /// Move `pending` entries to `processing`; returns the ids actually claimed
    async fn claim_entries(
        &self,
        ids: &[QueueEntryId],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntryId>>;

    /// `processing -> sent`; false when the entry was not processing
    async fn mark_sent(
        &self,
        id: QueueEntryId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// `processing -> failed` with `retry_count + 1`; false when the entry was not processing
    async fn mark_failed(&self, id: QueueEntryId, error: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn campaign_counts(&self, campaign_id: CampaignId) -> Result<CampaignQueueCounts>;

    /// Move failed entries whose backoff elapsed back to `pending`
    async fn requeue_failed(
        &self,
        backoff: &RetryBackoff,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>>;

    async fn get_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>>;
}

/// Database queue repository
pub struct DbQueueRepository {
    pool: DatabasePool,
}

impl DbQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn queue_entry_from_row(row: &PgRow) -> std::result::Result<QueueEntry, sqlx::Error> {
    Ok(QueueEntry {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        contact_id: row.try_get("contact_id")?,
        sender_id: row.try_get("sender_id")?,
        scheduled_for: row.try_get("scheduled_for")?,
        status: parse_column(row, "status")?,
        sent_at: row.try_get("sent_at")?,
        provider_message_id: row.try_get("provider_message_id")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        priority: row.try_get("priority")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl QueueRepository for DbQueueRepository {
    async fn fetch_candidates(
        &self,
        horizon: DateTime<Utc>,
        per_sender_limit: i64,
        total_limit: i64,
    ) -> Result<Vec<DispatchCandidate>> {
        let query = format!(
            r#"
            WITH ranked AS (
                SELECT {QUEUE_COLUMNS},
                       ROW_NUMBER() OVER (
                           PARTITION BY q.sender_id
                           ORDER BY q.priority DESC, q.scheduled_for ASC
                       ) AS sender_rank
                FROM email_queue q
                JOIN campaigns c ON c.id = q.campaign_id
                JOIN senders s ON s.id = q.sender_id
                JOIN contacts ct ON ct.id = q.contact_id
                WHERE q.status = 'pending'
                  AND q.scheduled_for <= $1
                  AND c.status = 'sending'
                  AND s.is_active
                  AND ct.is_active
            )
            SELECT r.*,
                   s.id AS sender_id_ref, s.email AS sender_email,
                   s.display_name AS sender_display_name,
                   s.daily_limit AS sender_daily_limit,
                   s.emails_sent_today AS sender_emails_sent_today,
                   s.current_day AS sender_current_day,
                   s.last_sent_at AS sender_last_sent_at,
                   s.counters_reset_at AS sender_counters_reset_at,
                   s.is_active AS sender_is_active,
                   ct.id AS contact_id_ref, ct.email AS contact_email,
                   ct.first_name AS contact_first_name,
                   ct.last_name AS contact_last_name,
                   ct.is_active AS contact_is_active
            FROM ranked r
            JOIN senders s ON s.id = r.sender_id
            JOIN contacts ct ON ct.id = r.contact_id
            WHERE r.sender_rank <= $2
            ORDER BY r.priority DESC, r.scheduled_for ASC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&query)
            .bind(horizon)
            .bind(per_sender_limit)
            .bind(total_limit)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut campaign_ids: Vec<CampaignId> = Vec::new();
        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = queue_entry_from_row(row).map_err(|e| Error::Database(e.to_string()))?;
            let sender =
                sender_from_row(row, "sender_", "sender_id_ref").map_err(|e| Error::Database(e.to_string()))?;
            let contact = contact_from_row(row, "contact_", "contact_id_ref")
                .map_err(|e| Error::Database(e.to_string()))?;
            if !campaign_ids.contains(&entry.campaign_id) {
                campaign_ids.push(entry.campaign_id);
            }
            decoded.push((entry, sender, contact));
        }

        if decoded.is_empty() {
            return Ok(Vec::new());
        }

        let campaign_rows = sqlx::query(
            r#"
            SELECT id, name, subject, html_template, status, scheduled_at,
                   start_time_of_day, send_duration_hours, warm_up_days,
                   emails_per_batch, batch_interval_minutes, start_date, end_date,
                   started_at, completed_at, created_at, updated_at
            FROM campaigns
            WHERE id = ANY($1)
            "#,
        )
        .bind(&campaign_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut campaigns = HashMap::with_capacity(campaign_rows.len());
        for row in &campaign_rows {
            let campaign = campaign_from_row(row).map_err(|e| Error::Database(e.to_string()))?;
            campaigns.insert(campaign.id, Arc::new(campaign));
        }

        decoded
            .into_iter()
            .map(|(entry, sender, contact)| {
                let campaign = campaigns.get(&entry.campaign_id).cloned().ok_or_else(|| {
                    Error::Database(format!("Campaign {} vanished during fetch", entry.campaign_id))
                })?;
                Ok(DispatchCandidate {
                    entry,
                    sender,
                    contact,
                    campaign,
                })
            })
            .collect()
    }

    async fn claim_entries(
        &self,
        ids: &[QueueEntryId],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntryId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'processing', updated_at = $2
            WHERE id = ANY($1) AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(ids)
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(|e| Error::Database(e.to_string())))
            .collect()
    }

    async fn mark_sent(
        &self,
        id: QueueEntryId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'sent', sent_at = $2, provider_message_id = $3,
                error_message = NULL, updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(provider_message_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: QueueEntryId, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'failed', error_message = $2,
                retry_count = retry_count + 1, updated_at = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn campaign_counts(&self, campaign_id: CampaignId) -> Result<CampaignQueueCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM email_queue
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(CampaignQueueCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }

    async fn requeue_failed(
        &self,
        backoff: &RetryBackoff,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>> {
        let query = format!(
            r#"
            UPDATE email_queue q
            SET status = 'pending', updated_at = $1
            FROM campaigns c
            WHERE q.id IN (
                SELECT f.id
                FROM email_queue f
                WHERE f.status = 'failed'
                  AND f.retry_count < $2
                  AND f.updated_at + make_interval(
                      secs => LEAST($3::double precision * POWER(2, GREATEST(f.retry_count, 1) - 1), $4::double precision)
                  ) <= $1
                ORDER BY f.updated_at ASC
                LIMIT $5
            )
              AND c.id = q.campaign_id
              AND c.status = 'sending'
              AND q.status = 'failed'
            RETURNING {QUEUE_COLUMNS}
            "#
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(backoff.max_retries)
            .bind(backoff.base_delay_secs)
            .bind(backoff.max_delay_secs)
            .bind(limit)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| queue_entry_from_row(row).map_err(|e| Error::Database(e.to_string())))
            .collect()
    }

    async fn get_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>> {
        let query = format!("SELECT {QUEUE_COLUMNS} FROM email_queue q WHERE q.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref()
            .map(queue_entry_from_row)
            .transpose()
            .map_err(|e| Error::Database(e.to_string()))
    }
}
