//! Scheduled-Start Trigger - Launches campaigns whose start time arrived

use super::launcher::CampaignStarter;
use chrono::{DateTime, Utc};
use mailramp_common::Result;
use mailramp_storage::models::{LogEvent, NewLogEntry};
use mailramp_storage::repository::{CampaignRepository, DispatchLogRepository};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one trigger pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub started: usize,
    pub failed: usize,
}

/// Promotes due `scheduled` campaigns through a [`CampaignStarter`]
pub struct ScheduledStartTrigger {
    campaigns: Arc<dyn CampaignRepository>,
    logs: Arc<dyn DispatchLogRepository>,
    starter: Arc<dyn CampaignStarter>,
}

impl ScheduledStartTrigger {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        logs: Arc<dyn DispatchLogRepository>,
        starter: Arc<dyn CampaignStarter>,
    ) -> Self {
        Self {
            campaigns,
            logs,
            starter,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<TriggerReport> {
        let due = self.campaigns.list_due_scheduled(now).await?;
        let mut report = TriggerReport::default();

        for campaign in due {
            info!(
                "Starting scheduled campaign {} (scheduled_at: {:?})",
                campaign.id, campaign.scheduled_at
            );

            match self.starter.start_campaign(&campaign, now).await {
                Ok(_) => report.started += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(campaign_id = %campaign.id, "Failed to start campaign: {}", e);
                    let entry = NewLogEntry::campaign(
                        campaign.id,
                        LogEvent::Error,
                        format!("Failed to start campaign: {}", e),
                    );
                    if let Err(log_err) = self.logs.append_log(entry).await {
                        warn!("Failed to record start error: {}", log_err);
                    }
                }
            }
        }

        Ok(report)
    }
}
