//! Retry Scheduler - Opt-in requeue of failed entries with exponential backoff

use chrono::{DateTime, Utc};
use mailramp_common::Result;
use mailramp_storage::models::{LogEvent, NewLogEntry, RetryBackoff};
use mailramp_storage::repository::{DispatchLogRepository, QueueRepository};
use std::sync::Arc;
use tracing::info;

/// Moves failed entries back to `pending` once their backoff has elapsed
pub struct RetryScheduler {
    queue: Arc<dyn QueueRepository>,
    logs: Arc<dyn DispatchLogRepository>,
    backoff: RetryBackoff,
    batch_limit: i64,
}

impl RetryScheduler {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        logs: Arc<dyn DispatchLogRepository>,
        backoff: RetryBackoff,
        batch_limit: i64,
    ) -> Self {
        Self {
            queue,
            logs,
            backoff,
            batch_limit,
        }
    }

    /// Requeue due entries; returns how many were moved
    pub async fn run(&self, now: DateTime<Utc>) -> Result<usize> {
        let requeued = self
            .queue
            .requeue_failed(&self.backoff, now, self.batch_limit)
            .await?;
        if requeued.is_empty() {
            return Ok(0);
        }

        info!(count = requeued.len(), "Requeued failed entries for retry");

        let logs = requeued
            .iter()
            .map(|entry| {
                NewLogEntry::entry(
                    entry,
                    LogEvent::Requeued,
                    format!("Requeued after {} failed attempt(s)", entry.retry_count),
                )
                .with_metadata(serde_json::json!({
                    "retry_count": entry.retry_count,
                    "last_error": entry.error_message,
                }))
            })
            .collect();
        self.logs.append_logs(logs).await?;

        Ok(requeued.len())
    }
}
