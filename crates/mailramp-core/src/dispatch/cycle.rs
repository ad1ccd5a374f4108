//! Dispatch Cycle - One full pass of the campaign dispatch engine

use super::clock::Clock;
use super::completion::CompletionChecker;
use super::counters::SenderCounters;
use super::dispatcher::{BatchDispatcher, BatchReport};
use super::eligibility;
use super::grouping::{group_by_sender, SenderGroup};
use super::launcher::{CampaignLauncher, CampaignStarter};
use super::retry::RetryScheduler;
use super::trigger::ScheduledStartTrigger;
use crate::provider::EmailProvider;
use chrono::Duration;
use mailramp_common::types::SenderId;
use mailramp_common::{Config, Error, Result};
use mailramp_storage::models::RetryBackoff;
use mailramp_storage::repository::Repositories;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Candidates fetched per cycle relative to the dispatch ceiling, so entries
/// skipped by the filter do not starve the cycle
const OVERFETCH_FACTOR: usize = 4;

/// Tunables of the dispatch cycle
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_entries_per_cycle: usize,
    pub max_batch_size: usize,
    pub concurrency_limit: usize,
    pub lookahead: Duration,
    pub max_campaign_days: i64,
    pub completion_grace_hours: i64,
    /// `None` disables automatic retries
    pub retry: Option<RetryBackoff>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        let dispatch = &config.dispatch;
        let retry = config.retry.enabled.then(|| RetryBackoff {
            max_retries: config.retry.max_retries,
            base_delay_secs: config.retry.base_delay_secs,
            max_delay_secs: config.retry.max_delay_secs,
        });

        Self {
            max_entries_per_cycle: dispatch.max_entries_per_cycle,
            max_batch_size: dispatch.max_batch_size,
            concurrency_limit: dispatch.concurrency_limit.max(1),
            lookahead: Duration::minutes(dispatch.lookahead_minutes.max(0)),
            max_campaign_days: dispatch.max_campaign_days,
            completion_grace_hours: dispatch.completion_grace_hours,
            retry,
        }
    }
}

/// Everything a cycle needs, passed explicitly
#[derive(Clone)]
pub struct DispatchContext {
    pub repos: Repositories,
    pub provider: Arc<dyn EmailProvider>,
    pub clock: Arc<dyn Clock>,
    pub settings: DispatchSettings,
}

/// Per-sender totals of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderSummary {
    pub sender_id: SenderId,
    pub sent: usize,
    pub failed: usize,
}

/// Result of [`DispatchCycle::run_once`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub success: bool,
    /// Entries that reached a terminal status
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Candidates left pending by the filter or claimed elsewhere
    pub skipped: usize,
    pub campaigns_started: usize,
    pub campaigns_completed: usize,
    pub retried: usize,
    pub senders: Vec<SenderSummary>,
}

/// One pass: trigger, rollover, fetch, filter, group, dispatch, retry, complete
pub struct DispatchCycle {
    ctx: DispatchContext,
    trigger: ScheduledStartTrigger,
    counters: SenderCounters,
    dispatcher: Arc<BatchDispatcher>,
    retry: Option<RetryScheduler>,
    completion: CompletionChecker,
}

impl DispatchCycle {
    pub fn new(ctx: DispatchContext) -> Self {
        let starter = Arc::new(CampaignLauncher::new(
            ctx.repos.campaigns.clone(),
            ctx.repos.senders.clone(),
            ctx.repos.logs.clone(),
            ctx.settings.completion_grace_hours,
            ctx.settings.max_campaign_days,
        ));
        Self::with_starter(ctx, starter)
    }

    /// Use a custom campaign starter instead of the built-in launcher
    pub fn with_starter(ctx: DispatchContext, starter: Arc<dyn CampaignStarter>) -> Self {
        let repos = &ctx.repos;
        let counters = SenderCounters::new(repos.senders.clone());
        let dispatcher = Arc::new(BatchDispatcher::new(
            repos.queue.clone(),
            repos.logs.clone(),
            counters.clone(),
            ctx.provider.clone(),
        ));
        let retry = ctx.settings.retry.map(|backoff| {
            RetryScheduler::new(
                repos.queue.clone(),
                repos.logs.clone(),
                backoff,
                ctx.settings.max_entries_per_cycle as i64,
            )
        });

        Self {
            trigger: ScheduledStartTrigger::new(repos.campaigns.clone(), repos.logs.clone(), starter),
            completion: CompletionChecker::new(
                repos.queue.clone(),
                repos.campaigns.clone(),
                repos.logs.clone(),
                ctx.settings.max_campaign_days,
            ),
            counters,
            dispatcher,
            retry,
            ctx,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.ctx.settings
    }

    /// Run one dispatch cycle.
    ///
    /// Provider failures are absorbed into the summary. Storage failures
    /// abort the cycle; the next cycle starts again from durable state.
    pub async fn run_once(&self) -> Result<CycleSummary> {
        let started = Instant::now();
        let settings = &self.ctx.settings;
        let now = self.ctx.clock.now();
        let mut summary = CycleSummary::default();

        let triggered = self.trigger.run(now).await?;
        summary.campaigns_started = triggered.started;

        self.counters.rollover(now).await?;

        let per_sender = settings.max_entries_per_cycle as i64;
        let total = settings
            .max_entries_per_cycle
            .saturating_mul(OVERFETCH_FACTOR) as i64;
        let candidates = self
            .ctx
            .repos
            .queue
            .fetch_candidates(now + settings.lookahead, per_sender, total)
            .await?;
        let fetched = candidates.len();

        let eligibility = eligibility::filter(candidates, now);
        summary.skipped = eligibility.skipped.total();
        debug!(
            fetched,
            eligible = eligibility.eligible.len(),
            inactive = eligibility.skipped.inactive,
            at_capacity = eligibility.skipped.at_capacity,
            outside_window = eligibility.skipped.outside_window,
            "Filtered dispatch candidates"
        );

        let groups = group_by_sender(
            eligibility.eligible,
            settings.max_entries_per_cycle,
            settings.max_batch_size,
        );

        for (sender_id, report) in self.dispatch_groups(groups).await? {
            summary.sent += report.sent;
            summary.failed += report.failed;
            summary.skipped += report.lost_claims;
            summary.senders.push(SenderSummary {
                sender_id,
                sent: report.sent,
                failed: report.failed,
            });
        }
        summary.processed = summary.sent + summary.failed;

        if let Some(retry) = &self.retry {
            summary.retried = retry.run(self.ctx.clock.now()).await?;
        }

        let completed = self.completion.check_all(self.ctx.clock.now()).await?;
        summary.campaigns_completed = completed.len();
        summary.success = true;

        info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            campaigns_started = summary.campaigns_started,
            campaigns_completed = summary.campaigns_completed,
            retried = summary.retried,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch cycle finished"
        );

        Ok(summary)
    }

    /// One task per sender group, bounded by the semaphore. Batches of a
    /// sender run in order inside its task.
    async fn dispatch_groups(&self, groups: Vec<SenderGroup>) -> Result<Vec<(SenderId, BatchReport)>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.concurrency_limit.max(1)));
        let mut handles = Vec::with_capacity(groups.len());

        for group in groups {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("Dispatch semaphore closed: {}", e)))?;
            let dispatcher = self.dispatcher.clone();
            let clock = self.ctx.clock.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let sender = group.sender;
                let mut report = BatchReport::default();
                for batch in group.batches {
                    report.absorb(dispatcher.dispatch(&sender, batch, clock.now()).await?);
                }
                Ok::<_, Error>((sender.id, report))
            });
            handles.push(handle);
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    error!("Sender batch failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Task error: {}", e);
                    first_error.get_or_insert(Error::Internal(format!("Dispatch task failed: {}", e)));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}
