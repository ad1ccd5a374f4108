//! Sender Counter Updater - Daily counters and warm-up day progression

use chrono::{DateTime, Utc};
use mailramp_common::types::SenderId;
use mailramp_common::Result;
use mailramp_storage::repository::SenderRepository;
use std::sync::Arc;
use tracing::{debug, info};

/// Maintains per-sender daily counters
#[derive(Clone)]
pub struct SenderCounters {
    senders: Arc<dyn SenderRepository>,
}

impl SenderCounters {
    pub fn new(senders: Arc<dyn SenderRepository>) -> Self {
        Self { senders }
    }

    /// Start a new day for senders whose last send predates today (UTC)
    pub async fn rollover(&self, now: DateTime<Utc>) -> Result<u64> {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);

        let rolled = self.senders.rollover_daily_counters(day_start, now).await?;
        if rolled > 0 {
            info!(senders = rolled, "Rolled over daily sender counters");
        }
        Ok(rolled)
    }

    /// Add `count` sends to the sender's daily counter
    pub async fn record_sent(&self, sender_id: SenderId, count: usize, now: DateTime<Utc>) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        debug!(sender_id = %sender_id, count, "Incrementing sender counter");
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        self.senders.increment_sent(sender_id, count, now).await
    }
}
