//! In-memory store
//!
//! Implements every repository trait over plain collections guarded by a
//! mutex. Semantics follow the PostgreSQL repositories: conditional status
//! transitions, atomic counter increments, all-or-nothing campaign launch.
//! Used by tests.

use crate::models::{
    Campaign, CampaignQueueCounts, CampaignStatus, Contact, DispatchCandidate, LaunchPlan,
    LogEntry, NewLogEntry, QueueEntry, QueueStatus, RetryBackoff, Sender,
};
use crate::repository::{
    CampaignRepository, DispatchLogRepository, HealthCheck, QueueRepository, SenderRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, ContactId, GroupId, QueueEntryId, SenderId};
use mailramp_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    senders: HashMap<SenderId, Sender>,
    contacts: HashMap<ContactId, Contact>,
    campaigns: HashMap<CampaignId, Campaign>,
    /// Insertion order is kept so scans are deterministic
    queue: Vec<QueueEntry>,
    logs: Vec<LogEntry>,
    group_members: HashMap<GroupId, Vec<ContactId>>,
    campaign_groups: HashMap<CampaignId, Vec<GroupId>>,
    campaign_senders: HashMap<CampaignId, Vec<SenderId>>,
}

/// Mutex-guarded store implementing all repositories
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_reads: Mutex<Option<String>>,
    /// Terminal entry updates allowed before they start failing
    entry_write_budget: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        if let Some(message) = self
            .fail_reads
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".to_string()))?
            .clone()
        {
            return Err(Error::Database(message));
        }
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".to_string()))
    }

    fn inspect(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Let `writes` more `mark_sent`/`mark_failed` calls through, then fail
    /// the rest with a database error
    pub fn fail_entry_writes_after(&self, writes: usize) {
        if let Ok(mut slot) = self.entry_write_budget.lock() {
            *slot = Some(writes);
        }
    }

    fn spend_entry_write(&self) -> Result<()> {
        let mut budget = self
            .entry_write_budget
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".to_string()))?;
        match budget.as_mut() {
            Some(0) => Err(Error::Database("entry write rejected".to_string())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Make every repository call fail with a database error until cleared
    pub fn fail_with(&self, message: Option<&str>) {
        if let Ok(mut slot) = self.fail_reads.lock() {
            *slot = message.map(str::to_string);
        }
    }

    pub fn insert_sender(&self, sender: Sender) {
        self.inspect().senders.insert(sender.id, sender);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.inspect().contacts.insert(contact.id, contact);
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.inspect().campaigns.insert(campaign.id, campaign);
    }

    pub fn insert_entry(&self, entry: QueueEntry) {
        self.inspect().queue.push(entry);
    }

    /// Put a contact into a group
    pub fn add_group_member(&self, group_id: GroupId, contact_id: ContactId) {
        self.inspect()
            .group_members
            .entry(group_id)
            .or_default()
            .push(contact_id);
    }

    /// Target a group with a campaign
    pub fn attach_group(&self, campaign_id: CampaignId, group_id: GroupId) {
        self.inspect()
            .campaign_groups
            .entry(campaign_id)
            .or_default()
            .push(group_id);
    }

    /// Allow a sender to send for a campaign
    pub fn attach_sender(&self, campaign_id: CampaignId, sender_id: SenderId) {
        self.inspect()
            .campaign_senders
            .entry(campaign_id)
            .or_default()
            .push(sender_id);
    }

    pub fn sender(&self, id: SenderId) -> Option<Sender> {
        self.inspect().senders.get(&id).cloned()
    }

    pub fn contact(&self, id: ContactId) -> Option<Contact> {
        self.inspect().contacts.get(&id).cloned()
    }

    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.inspect().campaigns.get(&id).cloned()
    }

    pub fn entry(&self, id: QueueEntryId) -> Option<QueueEntry> {
        self.inspect().queue.iter().find(|e| e.id == id).cloned()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.inspect().queue.clone()
    }

    pub fn entries_for_campaign(&self, campaign_id: CampaignId) -> Vec<QueueEntry> {
        self.inspect()
            .queue
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inspect().logs.clone()
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        self.state().map(|_| ())
    }
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn fetch_candidates(
        &self,
        horizon: DateTime<Utc>,
        per_sender_limit: i64,
        total_limit: i64,
    ) -> Result<Vec<DispatchCandidate>> {
        let state = self.state()?;

        let mut eligible: Vec<&QueueEntry> = state
            .queue
            .iter()
            .filter(|e| e.status == QueueStatus::Pending && e.scheduled_for <= horizon)
            .filter(|e| {
                state
                    .campaigns
                    .get(&e.campaign_id)
                    .map(|c| c.status == CampaignStatus::Sending)
                    .unwrap_or(false)
            })
            .filter(|e| {
                state.senders.get(&e.sender_id).map(|s| s.is_active).unwrap_or(false)
                    && state.contacts.get(&e.contact_id).map(|c| c.is_active).unwrap_or(false)
            })
            .collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
        });

        let mut per_sender: HashMap<SenderId, i64> = HashMap::new();
        let mut campaigns: HashMap<CampaignId, Arc<Campaign>> = HashMap::new();
        let mut candidates = Vec::new();
        for entry in eligible {
            if candidates.len() as i64 >= total_limit {
                break;
            }
            let taken = per_sender.entry(entry.sender_id).or_insert(0);
            if *taken >= per_sender_limit {
                continue;
            }
            *taken += 1;

            let (Some(sender), Some(contact), Some(campaign)) = (
                state.senders.get(&entry.sender_id),
                state.contacts.get(&entry.contact_id),
                state.campaigns.get(&entry.campaign_id),
            ) else {
                continue;
            };
            let campaign = campaigns
                .entry(campaign.id)
                .or_insert_with(|| Arc::new(campaign.clone()))
                .clone();

            candidates.push(DispatchCandidate {
                entry: entry.clone(),
                sender: sender.clone(),
                contact: contact.clone(),
                campaign,
            });
        }

        Ok(candidates)
    }

    async fn claim_entries(
        &self,
        ids: &[QueueEntryId],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntryId>> {
        let wanted: HashSet<&QueueEntryId> = ids.iter().collect();
        let mut state = self.state()?;
        let mut claimed = Vec::new();
        for entry in state.queue.iter_mut() {
            if wanted.contains(&entry.id) && entry.status == QueueStatus::Pending {
                entry.status = QueueStatus::Processing;
                entry.updated_at = now;
                claimed.push(entry.id);
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: QueueEntryId,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.spend_entry_write()?;
        let mut state = self.state()?;
        match state
            .queue
            .iter_mut()
            .find(|e| e.id == id && e.status == QueueStatus::Processing)
        {
            Some(entry) => {
                entry.status = QueueStatus::Sent;
                entry.sent_at = Some(now);
                entry.provider_message_id = provider_message_id.map(str::to_string);
                entry.error_message = None;
                entry.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, id: QueueEntryId, error: &str, now: DateTime<Utc>) -> Result<bool> {
        self.spend_entry_write()?;
        let mut state = self.state()?;
        match state
            .queue
            .iter_mut()
            .find(|e| e.id == id && e.status == QueueStatus::Processing)
        {
            Some(entry) => {
                entry.status = QueueStatus::Failed;
                entry.error_message = Some(error.to_string());
                entry.retry_count += 1;
                entry.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn campaign_counts(&self, campaign_id: CampaignId) -> Result<CampaignQueueCounts> {
        let state = self.state()?;
        let mut counts = CampaignQueueCounts::default();
        for entry in state.queue.iter().filter(|e| e.campaign_id == campaign_id) {
            match entry.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Sent => counts.sent += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn requeue_failed(
        &self,
        backoff: &RetryBackoff,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.state()?;
        let sending: HashSet<CampaignId> = state
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Sending)
            .map(|c| c.id)
            .collect();

        let mut due: Vec<usize> = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.status == QueueStatus::Failed
                    && sending.contains(&e.campaign_id)
                    && backoff.is_due(e.retry_count, e.updated_at, now)
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| state.queue[i].updated_at);
        due.truncate(limit.max(0) as usize);

        let mut requeued = Vec::with_capacity(due.len());
        for i in due {
            let entry = &mut state.queue[i];
            entry.status = QueueStatus::Pending;
            entry.updated_at = now;
            requeued.push(entry.clone());
        }
        Ok(requeued)
    }

    async fn get_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>> {
        let state = self.state()?;
        Ok(state.queue.iter().find(|e| e.id == id).cloned())
    }
}

#[async_trait]
impl SenderRepository for MemoryStore {
    async fn rollover_daily_counters(
        &self,
        day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state()?;
        let mut rolled = 0;
        for sender in state.senders.values_mut() {
            let Some(last_sent_at) = sender.last_sent_at else {
                continue;
            };
            let already_reset = sender
                .counters_reset_at
                .map(|reset| reset > last_sent_at)
                .unwrap_or(false);
            if last_sent_at < day_start && !already_reset {
                sender.emails_sent_today = 0;
                sender.current_day += 1;
                sender.counters_reset_at = Some(now);
                rolled += 1;
            }
        }
        Ok(rolled)
    }

    async fn increment_sent(&self, sender_id: SenderId, count: i32, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state()?;
        if let Some(sender) = state.senders.get_mut(&sender_id) {
            sender.emails_sent_today += count;
            sender.last_sent_at = Some(now);
        }
        Ok(())
    }

    async fn get_sender(&self, id: SenderId) -> Result<Option<Sender>> {
        let state = self.state()?;
        Ok(state.senders.get(&id).cloned())
    }

    async fn campaign_senders(&self, campaign_id: CampaignId) -> Result<Vec<Sender>> {
        let state = self.state()?;
        let mut senders: Vec<Sender> = state
            .campaign_senders
            .get(&campaign_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.senders.get(id))
                    .filter(|s| s.is_active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        senders.sort_by(|a, b| a.email.cmp(&b.email));
        senders.dedup_by_key(|s| s.id);
        Ok(senders)
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let state = self.state()?;
        Ok(state.campaigns.get(&id).cloned())
    }

    async fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let state = self.state()?;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.created_at);
        Ok(campaigns)
    }

    async fn list_due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let state = self.state()?;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.scheduled_at);
        Ok(campaigns)
    }

    async fn complete_campaign(&self, id: CampaignId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        match state.campaigns.get_mut(&id) {
            Some(campaign) if campaign.status == CampaignStatus::Sending => {
                campaign.status = CampaignStatus::Completed;
                campaign.completed_at = Some(now);
                campaign.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn launch_campaign(&self, plan: &LaunchPlan) -> Result<bool> {
        let mut state = self.state()?;
        match state.campaigns.get_mut(&plan.campaign_id) {
            Some(campaign) if campaign.status == CampaignStatus::Scheduled => {
                campaign.status = CampaignStatus::Sending;
                campaign.started_at = Some(plan.started_at);
                campaign.start_date = Some(plan.started_at);
                if campaign.end_date.is_none() {
                    campaign.end_date = plan.end_date;
                }
                campaign.updated_at = plan.started_at;
            }
            _ => return Ok(false),
        }

        for entry in &plan.entries {
            state.queue.push(QueueEntry {
                id: Uuid::now_v7(),
                campaign_id: entry.campaign_id,
                contact_id: entry.contact_id,
                sender_id: entry.sender_id,
                scheduled_for: entry.scheduled_for,
                status: QueueStatus::Pending,
                sent_at: None,
                provider_message_id: None,
                error_message: None,
                retry_count: 0,
                priority: entry.priority,
                created_at: plan.started_at,
                updated_at: plan.started_at,
            });
        }
        Ok(true)
    }

    async fn campaign_audience(&self, campaign_id: CampaignId) -> Result<Vec<Contact>> {
        let state = self.state()?;
        let mut seen = HashSet::new();
        let mut contacts: Vec<Contact> = state
            .campaign_groups
            .get(&campaign_id)
            .into_iter()
            .flatten()
            .filter_map(|group| state.group_members.get(group))
            .flatten()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| state.contacts.get(id))
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(contacts)
    }
}

#[async_trait]
impl DispatchLogRepository for MemoryStore {
    async fn append_log(&self, entry: NewLogEntry) -> Result<()> {
        self.append_logs(vec![entry]).await
    }

    async fn append_logs(&self, entries: Vec<NewLogEntry>) -> Result<()> {
        let mut state = self.state()?;
        let now = Utc::now();
        state.logs.extend(entries.into_iter().map(|entry| LogEntry {
            id: Uuid::now_v7(),
            campaign_id: entry.campaign_id,
            queue_entry_id: entry.queue_entry_id,
            sender_id: entry.sender_id,
            contact_id: entry.contact_id,
            event: entry.event,
            message: entry.message,
            metadata: entry.metadata,
            created_at: now,
        }));
        Ok(())
    }
}
