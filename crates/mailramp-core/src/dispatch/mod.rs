//! Campaign Dispatch Module - Warm-up aware batch sending of campaign queues

mod clock;
mod completion;
mod counters;
mod cycle;
mod dispatcher;
mod eligibility;
mod grouping;
mod launcher;
mod retry;
mod template;
mod trigger;
mod warmup;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use completion::{CompletionChecker, CompletionReason};
pub use counters::SenderCounters;
pub use cycle::{CycleSummary, DispatchContext, DispatchCycle, DispatchSettings, SenderSummary};
pub use dispatcher::{BatchDispatcher, BatchReport};
pub use eligibility::{filter, in_daily_window, Eligibility, SkipTally};
pub use grouping::{group_by_sender, SenderGroup};
pub use launcher::{CampaignLauncher, CampaignStarter, LaunchError};
pub use retry::RetryScheduler;
pub use template::TemplateRenderer;
pub use trigger::{ScheduledStartTrigger, TriggerReport};
pub use warmup::effective_limit;
pub use worker::DispatchWorker;
