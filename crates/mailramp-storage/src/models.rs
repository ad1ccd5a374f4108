//! Database models

use chrono::{DateTime, Duration, NaiveTime, Utc};
use mailramp_common::types::{
    CampaignId, ContactId, LogEntryId, QueueEntryId, SenderId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Queue entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }

    /// `sent` and `failed` are never left automatically by the dispatch cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Sent | QueueStatus::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(format!("Invalid queue status: {}", s)),
        }
    }
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "paused" => Ok(CampaignStatus::Paused),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Dispatch log event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Sent,
    Failed,
    Completed,
    Started,
    Requeued,
    Error,
}

impl LogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEvent::Sent => "sent",
            LogEvent::Failed => "failed",
            LogEvent::Completed => "completed",
            LogEvent::Started => "started",
            LogEvent::Requeued => "requeued",
            LogEvent::Error => "error",
        }
    }
}

impl std::fmt::Display for LogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(LogEvent::Sent),
            "failed" => Ok(LogEvent::Failed),
            "completed" => Ok(LogEvent::Completed),
            "started" => Ok(LogEvent::Started),
            "requeued" => Ok(LogEvent::Requeued),
            "error" => Ok(LogEvent::Error),
            _ => Err(format!("Invalid log event: {}", s)),
        }
    }
}

/// One planned send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub sender_id: SenderId,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sending identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: SenderId,
    pub email: String,
    pub display_name: Option<String>,
    /// Cap once warm-up has finished
    pub daily_limit: i32,
    pub emails_sent_today: i32,
    /// Warm-up day, starting at 1
    pub current_day: i32,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Last time the daily counters were rolled over
    pub counters_reset_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Campaign recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
}

/// Campaign model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub subject: String,
    pub html_template: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Start of the daily sending window (UTC)
    pub start_time_of_day: NaiveTime,
    /// Length of the daily sending window
    pub send_duration_hours: i32,
    pub warm_up_days: i32,
    pub emails_per_batch: i32,
    pub batch_interval_minutes: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Instant after which the campaign is closed regardless of backlog.
    ///
    /// A stored `end_date` wins; otherwise the end is derived from the
    /// campaign start plus `max_campaign_days`.
    pub fn end_at(&self, max_campaign_days: i64) -> Option<DateTime<Utc>> {
        self.end_date.or_else(|| {
            self.start_date
                .or(self.started_at)
                .map(|start| start + Duration::days(max_campaign_days))
        })
    }
}

/// Queue entry joined with everything the eligibility filter needs
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    pub entry: QueueEntry,
    pub sender: Sender,
    pub contact: Contact,
    pub campaign: Arc<Campaign>,
}

/// Create queue entry input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub sender_id: SenderId,
    pub scheduled_for: DateTime<Utc>,
    pub priority: i32,
}

/// Everything needed to move a campaign into `sending` in one transaction
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub campaign_id: CampaignId,
    pub started_at: DateTime<Utc>,
    /// Written only when the campaign has no end date yet
    pub end_date: Option<DateTime<Utc>>,
    pub entries: Vec<NewQueueEntry>,
}

/// Dispatch log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub campaign_id: Option<CampaignId>,
    pub queue_entry_id: Option<QueueEntryId>,
    pub sender_id: Option<SenderId>,
    pub contact_id: Option<ContactId>,
    pub event: LogEvent,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Create log entry input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub campaign_id: Option<CampaignId>,
    pub queue_entry_id: Option<QueueEntryId>,
    pub sender_id: Option<SenderId>,
    pub contact_id: Option<ContactId>,
    pub event: LogEvent,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl NewLogEntry {
    /// Campaign-scoped event
    pub fn campaign(campaign_id: CampaignId, event: LogEvent, message: impl Into<String>) -> Self {
        Self {
            campaign_id: Some(campaign_id),
            queue_entry_id: None,
            sender_id: None,
            contact_id: None,
            event,
            message: message.into(),
            metadata: serde_json::json!({}),
        }
    }

    /// Event about a single queue entry
    pub fn entry(entry: &QueueEntry, event: LogEvent, message: impl Into<String>) -> Self {
        Self {
            campaign_id: Some(entry.campaign_id),
            queue_entry_id: Some(entry.id),
            sender_id: Some(entry.sender_id),
            contact_id: Some(entry.contact_id),
            event,
            message: message.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Queue entry counts by status for one campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignQueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

impl CampaignQueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.sent + self.failed
    }

    /// Entries that can still be dispatched
    pub fn in_flight(&self) -> i64 {
        self.pending + self.processing
    }

    /// Sent share of all entries, as a percentage with two decimals
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let rate = (self.sent as f64 / total as f64) * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// Exponential backoff used when failed entries are requeued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    /// Entries that failed this many times stay failed
    pub max_retries: i32,
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
}

impl RetryBackoff {
    /// Wait after the `retry_count`-th failure: `base * 2^(retry_count - 1)`, capped
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exp = (retry_count.max(1) - 1) as u32;
        let factor = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
            .max(0);
        Duration::seconds(secs)
    }

    /// Whether an entry that failed at `failed_at` may be requeued at `now`
    pub fn is_due(&self, retry_count: i32, failed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        retry_count < self.max_retries && failed_at + self.delay_for(retry_count) <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Sent,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("queued".parse::<QueueStatus>().is_err());
        assert_eq!(CampaignStatus::Sending.to_string(), "sending");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(QueueStatus::Sent.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
    }

    #[test]
    fn test_success_rate() {
        let counts = CampaignQueueCounts {
            pending: 0,
            processing: 0,
            sent: 10,
            failed: 0,
        };
        assert_eq!(counts.success_rate(), 100.0);

        let counts = CampaignQueueCounts {
            pending: 0,
            processing: 0,
            sent: 2,
            failed: 1,
        };
        assert_eq!(counts.success_rate(), 66.67);
        assert_eq!(CampaignQueueCounts::default().success_rate(), 0.0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = RetryBackoff {
            max_retries: 5,
            base_delay_secs: 60,
            max_delay_secs: 300,
        };
        assert_eq!(backoff.delay_for(1), Duration::seconds(60));
        assert_eq!(backoff.delay_for(2), Duration::seconds(120));
        assert_eq!(backoff.delay_for(3), Duration::seconds(240));
        assert_eq!(backoff.delay_for(4), Duration::seconds(300));
        assert_eq!(backoff.delay_for(80), Duration::seconds(300));
    }

    #[test]
    fn test_backoff_due() {
        let backoff = RetryBackoff {
            max_retries: 2,
            base_delay_secs: 60,
            max_delay_secs: 600,
        };
        let failed_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(!backoff.is_due(1, failed_at, failed_at + Duration::seconds(59)));
        assert!(backoff.is_due(1, failed_at, failed_at + Duration::seconds(60)));
        assert!(!backoff.is_due(2, failed_at, failed_at + Duration::days(1)));
    }

    #[test]
    fn test_end_at_prefers_stored_end_date() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut campaign = Campaign {
            id: uuid::Uuid::new_v4(),
            name: "Spring".to_string(),
            subject: "Hi".to_string(),
            html_template: String::new(),
            status: CampaignStatus::Sending,
            scheduled_at: None,
            start_time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            send_duration_hours: 8,
            warm_up_days: 0,
            emails_per_batch: 10,
            batch_interval_minutes: 5,
            start_date: Some(start),
            end_date: None,
            started_at: None,
            completed_at: None,
            created_at: start,
            updated_at: start,
        };
        assert_eq!(campaign.end_at(30), Some(start + Duration::days(30)));

        let end = start + Duration::days(2);
        campaign.end_date = Some(end);
        assert_eq!(campaign.end_at(30), Some(end));
    }
}
