//! Eligibility filter
//!
//! Decides which fetched candidates may be sent in the current cycle.
//! Checks run in order: activity, daily cap, sending window.

use super::warmup::effective_limit;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use mailramp_common::types::SenderId;
use mailramp_storage::models::{CampaignStatus, DispatchCandidate};
use serde::Serialize;
use std::collections::HashMap;

/// Why candidates were left pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipTally {
    /// Sender or contact inactive, or campaign no longer sending
    pub inactive: usize,
    /// Sender reached its warm-up cap
    pub at_capacity: usize,
    /// Future entry outside the campaign's daily window
    pub outside_window: usize,
}

impl SkipTally {
    pub fn total(&self) -> usize {
        self.inactive + self.at_capacity + self.outside_window
    }
}

/// Filter result
#[derive(Debug, Default)]
pub struct Eligibility {
    pub eligible: Vec<DispatchCandidate>,
    pub skipped: SkipTally,
}

/// Whether `now` lies inside the daily window starting at `start` and
/// lasting `duration_hours`. Both bounds are inclusive and a window may
/// run past midnight into the next UTC day.
pub fn in_daily_window(now: DateTime<Utc>, start: NaiveTime, duration_hours: i32) -> bool {
    if duration_hours >= 24 {
        return true;
    }
    if duration_hours < 0 {
        return false;
    }

    let length = Duration::hours(i64::from(duration_hours));
    let today = now.date_naive();
    [today.pred_opt(), Some(today)]
        .into_iter()
        .flatten()
        .map(|day| day.and_time(start).and_utc())
        .any(|open| now >= open && now <= open + length)
}

/// Apply the eligibility rules to `candidates`, preserving their order.
///
/// Capacity is consumed as entries are admitted, so a sender never gets
/// more than `effective_limit - emails_sent_today` entries in one pass.
pub fn filter(candidates: Vec<DispatchCandidate>, now: DateTime<Utc>) -> Eligibility {
    let mut admitted: HashMap<SenderId, i32> = HashMap::new();
    let mut result = Eligibility::default();

    for candidate in candidates {
        if !candidate.sender.is_active
            || !candidate.contact.is_active
            || candidate.campaign.status != CampaignStatus::Sending
        {
            result.skipped.inactive += 1;
            continue;
        }

        let limit = effective_limit(
            candidate.sender.daily_limit,
            candidate.sender.current_day,
            candidate.campaign.warm_up_days,
        );
        let already = admitted.get(&candidate.sender.id).copied().unwrap_or(0);
        if candidate.sender.emails_sent_today + already >= limit {
            result.skipped.at_capacity += 1;
            continue;
        }

        let immediate = candidate.entry.scheduled_for <= now;
        if !immediate
            && !in_daily_window(
                now,
                candidate.campaign.start_time_of_day,
                candidate.campaign.send_duration_hours,
            )
        {
            result.skipped.outside_window += 1;
            continue;
        }

        *admitted.entry(candidate.sender.id).or_insert(0) += 1;
        result.eligible.push(candidate);
    }

    result
}
