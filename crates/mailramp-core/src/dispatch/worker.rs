//! Dispatch Worker - Runs the dispatch cycle on a fixed interval

use super::cycle::DispatchCycle;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// In-process scheduler for deployments without an external cron
pub struct DispatchWorker {
    cycle: Arc<DispatchCycle>,
    poll_interval_secs: u64,
}

impl DispatchWorker {
    pub fn new(cycle: Arc<DispatchCycle>) -> Self {
        Self {
            cycle,
            poll_interval_secs: 60,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    /// Run one cycle per tick until `shutdown` flips to `true` or its sender
    /// is dropped. A cycle in progress always runs to the end, so claimed
    /// entries are never abandoned mid-batch. Failed cycles are logged and
    /// the next tick starts over.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Dispatch worker started (interval: {}s, concurrency: {}, ceiling: {})",
            self.poll_interval_secs,
            self.cycle.settings().concurrency_limit,
            self.cycle.settings().max_entries_per_cycle
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Dispatch worker stopped");
    }

    async fn tick(&self) {
        if let Err(e) = self.cycle.run_once().await {
            error!("Dispatch cycle failed: {}", e);
        }
    }
}
