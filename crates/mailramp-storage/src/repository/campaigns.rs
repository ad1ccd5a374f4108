//! Campaign repository

use crate::db::DatabasePool;
use crate::models::{Campaign, CampaignStatus, Contact, LaunchPlan};
use crate::repository::parse_column;
use crate::repository::senders::contact_from_row;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::CampaignId;
use mailramp_common::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str = "id, name, subject, html_template, status, scheduled_at, \
    start_time_of_day, send_duration_hours, warm_up_days, emails_per_batch, \
    batch_interval_minutes, start_date, end_date, started_at, completed_at, \
    created_at, updated_at";

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    async fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;

    /// `scheduled` campaigns whose `scheduled_at` is at or before `now`
    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;

    /// `sending -> completed`; false when the campaign was not sending
    async fn complete_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool>;

    /// Flip `scheduled -> sending` and insert the plan's entries in one
    /// transaction. False, with nothing written, when the campaign was not
    /// `scheduled`.
    async fn launch_campaign(&self, plan: &LaunchPlan) -> Result<bool>;

    /// Distinct active contacts in the campaign's groups
    async fn campaign_audience(&self, campaign_id: CampaignId) -> Result<Vec<Contact>>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn campaign_from_row(row: &PgRow) -> std::result::Result<Campaign, sqlx::Error> {
    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        html_template: row.try_get("html_template")?,
        status: parse_column(row, "status")?,
        scheduled_at: row.try_get("scheduled_at")?,
        start_time_of_day: row.try_get("start_time_of_day")?,
        send_duration_hours: row.try_get("send_duration_hours")?,
        warm_up_days: row.try_get("warm_up_days")?,
        emails_per_batch: row.try_get("emails_per_batch")?,
        batch_interval_minutes: row.try_get("batch_interval_minutes")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let query = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref()
            .map(campaign_from_row)
            .transpose()
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let query = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| campaign_from_row(row).map_err(|e| Error::Database(e.to_string())))
            .collect()
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let query = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'scheduled'
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| campaign_from_row(row).map_err(|e| Error::Database(e.to_string())))
            .collect()
    }

    async fn complete_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed', completed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn launch_campaign(&self, plan: &LaunchPlan) -> Result<bool> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let flipped = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending',
                started_at = $2,
                start_date = $2,
                end_date = COALESCE(end_date, $3),
                updated_at = $2
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(plan.campaign_id)
        .bind(plan.started_at)
        .bind(plan.end_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if flipped.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
            debug!(campaign_id = %plan.campaign_id, "Campaign already left scheduled state");
            return Ok(false);
        }

        for entry in &plan.entries {
            sqlx::query(
                r#"
                INSERT INTO email_queue (
                    id, campaign_id, contact_id, sender_id, scheduled_for,
                    status, retry_count, priority, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $7)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(entry.campaign_id)
            .bind(entry.contact_id)
            .bind(entry.sender_id)
            .bind(entry.scheduled_for)
            .bind(entry.priority)
            .bind(plan.started_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(true)
    }

    async fn campaign_audience(&self, campaign_id: CampaignId) -> Result<Vec<Contact>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ct.id, ct.email, ct.first_name, ct.last_name, ct.is_active
            FROM contacts ct
            JOIN contact_group_members m ON m.contact_id = ct.id
            JOIN campaign_groups cg ON cg.group_id = m.group_id
            WHERE cg.campaign_id = $1 AND ct.is_active
            ORDER BY ct.email ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|row| contact_from_row(row, "", "id").map_err(|e| Error::Database(e.to_string())))
            .collect()
    }
}
