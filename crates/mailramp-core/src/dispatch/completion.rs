//! Campaign Completion Checker

use chrono::{DateTime, Utc};
use mailramp_common::types::CampaignId;
use mailramp_common::Result;
use mailramp_storage::models::{Campaign, CampaignStatus, LogEvent, NewLogEntry};
use mailramp_storage::repository::{CampaignRepository, DispatchLogRepository, QueueRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a campaign was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// No pending or processing entries remain
    Drained,
    /// The campaign ran past its end date
    EndDateReached,
}

/// Closes `sending` campaigns that are done
pub struct CompletionChecker {
    queue: Arc<dyn QueueRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    logs: Arc<dyn DispatchLogRepository>,
    max_campaign_days: i64,
}

impl CompletionChecker {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        logs: Arc<dyn DispatchLogRepository>,
        max_campaign_days: i64,
    ) -> Self {
        Self {
            queue,
            campaigns,
            logs,
            max_campaign_days,
        }
    }

    /// Check every sending campaign. A failure on one campaign is logged
    /// against it and the scan moves on.
    pub async fn check_all(&self, now: DateTime<Utc>) -> Result<Vec<(CampaignId, CompletionReason)>> {
        let campaigns = self
            .campaigns
            .list_campaigns_by_status(CampaignStatus::Sending)
            .await?;

        let mut completed = Vec::new();
        for campaign in campaigns {
            match self.check_campaign(&campaign, now).await {
                Ok(Some(reason)) => completed.push((campaign.id, reason)),
                Ok(None) => {}
                Err(e) => {
                    error!(campaign_id = %campaign.id, "Completion check failed: {}", e);
                    let entry = NewLogEntry::campaign(
                        campaign.id,
                        LogEvent::Error,
                        format!("Completion check failed: {}", e),
                    );
                    if let Err(log_err) = self.logs.append_log(entry).await {
                        warn!("Failed to record completion error: {}", log_err);
                    }
                }
            }
        }

        Ok(completed)
    }

    /// Complete one campaign if it is drained or past its end date
    pub async fn check_campaign(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletionReason>> {
        let counts = self.queue.campaign_counts(campaign.id).await?;

        if counts.total() == 0 {
            warn!(
                campaign_id = %campaign.id,
                "Sending campaign has no queue entries"
            );
        }

        let reason = if counts.total() > 0 && counts.in_flight() == 0 {
            CompletionReason::Drained
        } else if campaign
            .end_at(self.max_campaign_days)
            .map(|end| end <= now)
            .unwrap_or(false)
        {
            CompletionReason::EndDateReached
        } else {
            return Ok(None);
        };

        if !self.campaigns.complete_campaign(campaign.id, now).await? {
            debug!(campaign_id = %campaign.id, "Campaign already left sending state");
            return Ok(None);
        }

        let message = match reason {
            CompletionReason::Drained => format!(
                "Campaign completed: {}/{} sent ({}%)",
                counts.sent,
                counts.total(),
                counts.success_rate()
            ),
            CompletionReason::EndDateReached => "End date reached".to_string(),
        };

        info!(
            campaign_id = %campaign.id,
            sent = counts.sent,
            failed = counts.failed,
            pending = counts.pending,
            "Campaign {} completed: {}",
            campaign.name,
            message
        );

        self.logs
            .append_log(
                NewLogEntry::campaign(campaign.id, LogEvent::Completed, message).with_metadata(
                    serde_json::json!({
                        "reason": reason,
                        "sent": counts.sent,
                        "failed": counts.failed,
                        "pending": counts.pending,
                        "processing": counts.processing,
                        "total": counts.total(),
                        "success_rate": counts.success_rate(),
                    }),
                ),
            )
            .await?;

        Ok(Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{at, Fixture};
    use chrono::Duration;
    use mailramp_storage::models::QueueStatus;
    use pretty_assertions::assert_eq;

    fn checker(fixture: &Fixture) -> CompletionChecker {
        CompletionChecker::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
            30,
        )
    }

    #[tokio::test]
    async fn test_drained_campaign_completes() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        for _ in 0..10 {
            fixture.entry_with_status(&campaign, &sender, QueueStatus::Sent);
        }

        let completed = checker(&fixture).check_all(at(12, 0)).await.unwrap();
        assert_eq!(completed, vec![(campaign.id, CompletionReason::Drained)]);

        let stored = fixture.store.campaign(campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.completed_at, Some(at(12, 0)));

        let log = fixture
            .store
            .logs()
            .into_iter()
            .find(|l| l.event == LogEvent::Completed)
            .unwrap();
        assert_eq!(log.metadata["success_rate"], serde_json::json!(100.0));
        assert_eq!(log.metadata["total"], serde_json::json!(10));
    }

    #[tokio::test]
    async fn test_pending_entries_keep_campaign_open() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        fixture.entry_with_status(&campaign, &sender, QueueStatus::Sent);
        fixture.entry_with_status(&campaign, &sender, QueueStatus::Pending);

        let completed = checker(&fixture).check_all(at(12, 0)).await.unwrap();
        assert!(completed.is_empty());
        assert_eq!(
            fixture.store.campaign(campaign.id).unwrap().status,
            CampaignStatus::Sending
        );
    }

    #[tokio::test]
    async fn test_end_date_closes_with_backlog() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.campaign_with(|c| c.end_date = Some(at(11, 0)));
        let pending = fixture.entry_with_status(&campaign, &sender, QueueStatus::Pending);

        let completed = checker(&fixture).check_all(at(12, 0)).await.unwrap();
        assert_eq!(completed, vec![(campaign.id, CompletionReason::EndDateReached)]);

        // Leftover entries are not touched
        assert_eq!(
            fixture.store.entry(pending.id).unwrap().status,
            QueueStatus::Pending
        );
        let log = fixture
            .store
            .logs()
            .into_iter()
            .find(|l| l.event == LogEvent::Completed)
            .unwrap();
        assert_eq!(log.message, "End date reached");
    }

    #[tokio::test]
    async fn test_derived_end_date_uses_max_days() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        fixture.entry_with_status(&campaign, &sender, QueueStatus::Pending);

        let checker = checker(&fixture);
        let before = at(8, 0) + Duration::days(30) - Duration::minutes(1);
        assert!(checker.check_all(before).await.unwrap().is_empty());

        let after = at(8, 0) + Duration::days(30);
        assert_eq!(checker.check_all(after).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_campaign_left_alone() {
        let fixture = Fixture::new();
        let campaign = fixture.sending_campaign();

        let completed = checker(&fixture).check_all(at(12, 0)).await.unwrap();
        assert!(completed.is_empty());
        assert_eq!(
            fixture.store.campaign(campaign.id).unwrap().status,
            CampaignStatus::Sending
        );
    }
}
