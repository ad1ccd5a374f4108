//! Shared fixtures for dispatch tests

use crate::provider::{BatchOutcome, EmailProvider, OutboundEmail, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use mailramp_common::types::ContactId;
use mailramp_storage::models::{
    Campaign, CampaignStatus, Contact, DispatchCandidate, QueueEntry, QueueStatus, Sender,
};
use mailramp_storage::MemoryStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

static SEQ: AtomicUsize = AtomicUsize::new(0);

fn next() -> usize {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// 2024-03-04 at `hour:minute` UTC
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

pub fn sender(daily_limit: i32) -> Sender {
    Sender {
        id: Uuid::new_v4(),
        email: format!("sender-{}@example.com", next()),
        display_name: Some("Warmup Team".to_string()),
        daily_limit,
        emails_sent_today: 0,
        current_day: 1,
        last_sent_at: None,
        counters_reset_at: None,
        is_active: true,
    }
}

pub fn contact() -> Contact {
    let n = next();
    Contact {
        id: Uuid::new_v4(),
        email: format!("contact-{}@example.com", n),
        first_name: Some(format!("Contact{}", n)),
        last_name: None,
        is_active: true,
    }
}

pub fn campaign(status: CampaignStatus) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        name: format!("Campaign {}", next()),
        subject: "Hi {{first_name}}".to_string(),
        html_template: "<p>Hello {{first_name}}</p>".to_string(),
        status,
        scheduled_at: None,
        start_time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        send_duration_hours: 8,
        warm_up_days: 0,
        emails_per_batch: 10,
        batch_interval_minutes: 5,
        start_date: Some(at(8, 0)),
        end_date: None,
        started_at: Some(at(8, 0)),
        completed_at: None,
        created_at: at(7, 0),
        updated_at: at(7, 0),
    }
}

pub fn entry(campaign: &Campaign, sender: &Sender, contact: &Contact, scheduled_for: DateTime<Utc>) -> QueueEntry {
    QueueEntry {
        id: Uuid::new_v4(),
        campaign_id: campaign.id,
        contact_id: contact.id,
        sender_id: sender.id,
        scheduled_for,
        status: QueueStatus::Pending,
        sent_at: None,
        provider_message_id: None,
        error_message: None,
        retry_count: 0,
        priority: 0,
        created_at: at(7, 0),
        updated_at: at(7, 0),
    }
}

/// Detached candidate with its own sender, contact and sending campaign
pub fn candidate(scheduled_for: DateTime<Utc>) -> DispatchCandidate {
    let sender = sender(100);
    let contact = contact();
    let campaign = campaign(CampaignStatus::Sending);
    DispatchCandidate {
        entry: entry(&campaign, &sender, &contact, scheduled_for),
        sender,
        contact,
        campaign: Arc::new(campaign),
    }
}

/// Memory store seeded through helper methods
pub struct Fixture {
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn sender(&self, daily_limit: i32) -> Sender {
        let s = sender(daily_limit);
        self.store.insert_sender(s.clone());
        s
    }

    pub fn save_sender(&self, sender: &Sender) {
        self.store.insert_sender(sender.clone());
    }

    pub fn sending_campaign(&self) -> Campaign {
        self.campaign_with(|_| {})
    }

    pub fn campaign_with(&self, tweak: impl FnOnce(&mut Campaign)) -> Campaign {
        let mut c = campaign(CampaignStatus::Sending);
        tweak(&mut c);
        self.store.insert_campaign(c.clone());
        c
    }

    pub fn contact(&self) -> Contact {
        let c = contact();
        self.store.insert_contact(c.clone());
        c
    }

    pub fn store_contact(&self, id: ContactId) -> Contact {
        self.store.contact(id).unwrap()
    }

    /// `count` pending entries, each to a fresh contact
    pub fn pending_entries(
        &self,
        campaign: &Campaign,
        sender: &Sender,
        count: usize,
        scheduled_for: DateTime<Utc>,
    ) -> Vec<QueueEntry> {
        (0..count)
            .map(|_| {
                let contact = self.contact();
                let e = entry(campaign, sender, &contact, scheduled_for);
                self.store.insert_entry(e.clone());
                e
            })
            .collect()
    }

    pub fn entry_with_status(
        &self,
        campaign: &Campaign,
        sender: &Sender,
        status: QueueStatus,
    ) -> QueueEntry {
        let contact = self.contact();
        let mut e = entry(campaign, sender, &contact, at(8, 0));
        e.status = status;
        self.store.insert_entry(e.clone());
        e
    }

    /// Candidates for stored entries, joined from the store
    pub fn candidates(&self, entries: &[QueueEntry]) -> Vec<DispatchCandidate> {
        entries
            .iter()
            .map(|e| DispatchCandidate {
                entry: self.store.entry(e.id).unwrap(),
                sender: self.store.sender(e.sender_id).unwrap(),
                contact: self.store.contact(e.contact_id).unwrap(),
                campaign: Arc::new(self.store.campaign(e.campaign_id).unwrap()),
            })
            .collect()
    }
}

/// Provider returning scripted responses, then accepting everything
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<BatchOutcome, ProviderError>>>,
    fail_all: Option<String>,
    batches: Mutex<Vec<Vec<OutboundEmail>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<BatchOutcome, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fail_all: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Vec::new())
    }

    /// Fails every call with an API error carrying `message`
    pub fn failing(message: &str) -> Self {
        Self {
            fail_all: Some(message.to_string()),
            ..Self::accepting()
        }
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batches(&self) -> Vec<Vec<OutboundEmail>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<BatchOutcome, ProviderError> {
        self.batches.lock().unwrap().push(emails.to_vec());

        if let Some(message) = &self.fail_all {
            return Err(ProviderError::Api {
                status: 500,
                message: message.clone(),
            });
        }

        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(BatchOutcome::accepted(
                (0..emails.len()).map(|_| Some(format!("msg_{}", next()))),
            )),
        }
    }
}
