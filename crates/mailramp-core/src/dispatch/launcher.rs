//! Campaign Launcher - Materializes queue entries and starts a campaign

use super::warmup::effective_limit;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailramp_storage::models::{
    Campaign, LaunchPlan, LogEvent, NewLogEntry, NewQueueEntry, Sender,
};
use mailramp_storage::repository::{CampaignRepository, DispatchLogRepository, SenderRepository};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Campaign launch errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Campaign has no active recipients")]
    NoRecipients,

    #[error("Campaign has no active senders")]
    NoSenders,

    #[error("Campaign was already started")]
    AlreadyStarted,

    #[error("Storage error: {0}")]
    Store(#[from] mailramp_common::Error),
}

/// Starts a due campaign
#[async_trait]
pub trait CampaignStarter: Send + Sync {
    /// Launch `campaign`; returns the number of queue entries created
    async fn start_campaign(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<usize, LaunchError>;
}

/// Builds the send plan from the campaign audience and senders
pub struct CampaignLauncher {
    campaigns: Arc<dyn CampaignRepository>,
    senders: Arc<dyn SenderRepository>,
    logs: Arc<dyn DispatchLogRepository>,
    completion_grace: Duration,
    max_campaign_days: i64,
}

impl CampaignLauncher {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        senders: Arc<dyn SenderRepository>,
        logs: Arc<dyn DispatchLogRepository>,
        completion_grace_hours: i64,
        max_campaign_days: i64,
    ) -> Self {
        Self {
            campaigns,
            senders,
            logs,
            completion_grace: Duration::hours(completion_grace_hours),
            max_campaign_days,
        }
    }

    /// Send slot of the `index`-th entry: every `emails_per_batch` entries
    /// the slot moves `batch_interval_minutes` later.
    fn slot_for(campaign: &Campaign, start: DateTime<Utc>, index: usize) -> DateTime<Utc> {
        let per_batch = campaign.emails_per_batch.max(1) as usize;
        let batch_number = (index / per_batch) as i64;
        start + Duration::minutes(i64::from(campaign.batch_interval_minutes.max(0)) * batch_number)
    }

    /// Calendar days a sender needs to send `assigned` emails under its
    /// warm-up caps, counting the launch day as day one. `None` when the
    /// sender cannot drain them within `horizon_days`.
    fn drain_days(sender: &Sender, warm_up_days: i32, assigned: usize, horizon_days: i64) -> Option<i64> {
        let mut remaining = assigned as i64;
        let mut used_today = i64::from(sender.emails_sent_today.max(0));
        for offset in 0..horizon_days.max(1) {
            let day = sender.current_day.max(1).saturating_add(offset as i32);
            let cap = i64::from(effective_limit(sender.daily_limit, day, warm_up_days));
            remaining -= (cap - used_today).max(0);
            used_today = 0;
            if remaining <= 0 {
                return Some(offset + 1);
            }
        }
        None
    }

    /// End date covering the slowest sender's warm-up ramp, the last batch
    /// slot, and the completion grace. `None` leaves the campaign to the
    /// configured maximum duration.
    fn derive_end_date(
        &self,
        campaign: &Campaign,
        senders: &[Sender],
        entries: &[NewQueueEntry],
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut days = 0;
        for sender in senders {
            let assigned = entries.iter().filter(|e| e.sender_id == sender.id).count();
            if assigned == 0 {
                continue;
            }
            days = days.max(Self::drain_days(
                sender,
                campaign.warm_up_days,
                assigned,
                self.max_campaign_days,
            )?);
        }

        let last_slot = entries.last().map(|e| e.scheduled_for).unwrap_or(now);
        Some(last_slot.max(now + Duration::days((days - 1).max(0))) + self.completion_grace)
    }
}

#[async_trait]
impl CampaignStarter for CampaignLauncher {
    async fn start_campaign(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<usize, LaunchError> {
        let contacts = self.campaigns.campaign_audience(campaign.id).await?;
        if contacts.is_empty() {
            return Err(LaunchError::NoRecipients);
        }
        let senders = self.senders.campaign_senders(campaign.id).await?;
        if senders.is_empty() {
            return Err(LaunchError::NoSenders);
        }

        let entries: Vec<NewQueueEntry> = contacts
            .iter()
            .enumerate()
            .map(|(index, contact)| NewQueueEntry {
                campaign_id: campaign.id,
                contact_id: contact.id,
                sender_id: senders[index % senders.len()].id,
                scheduled_for: Self::slot_for(campaign, now, index),
                priority: 0,
            })
            .collect();

        let last_slot = entries
            .last()
            .map(|entry| entry.scheduled_for)
            .unwrap_or(now);
        let end_date = self.derive_end_date(campaign, &senders, &entries, now);
        let plan = LaunchPlan {
            campaign_id: campaign.id,
            started_at: now,
            end_date,
            entries,
        };

        if !self.campaigns.launch_campaign(&plan).await? {
            return Err(LaunchError::AlreadyStarted);
        }

        let created = plan.entries.len();
        info!(
            campaign_id = %campaign.id,
            entries = created,
            senders = senders.len(),
            "Campaign {} started",
            campaign.name
        );

        self.logs
            .append_log(
                NewLogEntry::campaign(
                    campaign.id,
                    LogEvent::Started,
                    format!("Campaign started with {} queued emails", created),
                )
                .with_metadata(serde_json::json!({
                    "entries": created,
                    "senders": senders.len(),
                    "last_slot": last_slot,
                    "end_date": end_date,
                })),
            )
            .await?;

        Ok(created)
    }
}
