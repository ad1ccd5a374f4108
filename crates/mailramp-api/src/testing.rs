//! Router fixtures backed by the in-memory store

use crate::auth::AppState;
use crate::routes::create_router;
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use mailramp_core::provider::BatchOutcome;
use mailramp_core::{
    DispatchContext, DispatchCycle, DispatchSettings, EmailProvider, FixedClock, OutboundEmail,
    ProviderError,
};
use mailramp_storage::models::{Campaign, CampaignStatus, Contact, QueueEntry, QueueStatus, Sender};
use mailramp_storage::repository::Repositories;
use mailramp_storage::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

/// Accepts every message and hands out sequential ids
pub struct AcceptingProvider;

#[async_trait]
impl EmailProvider for AcceptingProvider {
    fn name(&self) -> &str {
        "accepting"
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<BatchOutcome, ProviderError> {
        Ok(BatchOutcome::accepted(
            (0..emails.len()).map(|i| Some(format!("msg-{i}"))),
        ))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    state: AppState,
}

impl TestApp {
    pub fn new(trigger_token: Option<&str>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_store(store.clone());
        let ctx = DispatchContext {
            repos: repos.clone(),
            provider: Arc::new(AcceptingProvider),
            clock: Arc::new(FixedClock::new(now())),
            settings: DispatchSettings::default(),
        };

        let state = AppState {
            cycle: Arc::new(DispatchCycle::new(ctx)),
            health: repos.health,
            trigger_token: trigger_token.map(str::to_string),
        };

        Self { store, state }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(create_router(self.state.clone())).unwrap()
    }

    /// A sending campaign with `count` entries due a minute ago
    pub fn seed_sending_campaign(&self, count: usize) -> Vec<Uuid> {
        let sender = Sender {
            id: Uuid::new_v4(),
            email: "news@example.com".to_string(),
            display_name: Some("Newsletter".to_string()),
            daily_limit: 100,
            emails_sent_today: 0,
            current_day: 1,
            last_sent_at: None,
            counters_reset_at: None,
            is_active: true,
        };
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "Spring launch".to_string(),
            subject: "Hello {{first_name}}".to_string(),
            html_template: "<p>Hi {{first_name}}</p>".to_string(),
            status: CampaignStatus::Sending,
            scheduled_at: None,
            start_time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            send_duration_hours: 8,
            warm_up_days: 0,
            emails_per_batch: 10,
            batch_interval_minutes: 5,
            start_date: Some(now() - Duration::hours(1)),
            end_date: None,
            started_at: Some(now() - Duration::hours(1)),
            completed_at: None,
            created_at: now() - Duration::hours(2),
            updated_at: now() - Duration::hours(2),
        };
        self.store.insert_sender(sender.clone());
        self.store.insert_campaign(campaign.clone());

        (0..count)
            .map(|i| {
                let contact = Contact {
                    id: Uuid::new_v4(),
                    email: format!("reader-{i}@example.com"),
                    first_name: Some(format!("Reader{i}")),
                    last_name: None,
                    is_active: true,
                };
                let entry = QueueEntry {
                    id: Uuid::new_v4(),
                    campaign_id: campaign.id,
                    contact_id: contact.id,
                    sender_id: sender.id,
                    scheduled_for: now() - Duration::minutes(1),
                    status: QueueStatus::Pending,
                    sent_at: None,
                    provider_message_id: None,
                    error_message: None,
                    retry_count: 0,
                    priority: 0,
                    created_at: now() - Duration::hours(1),
                    updated_at: now() - Duration::hours(1),
                };
                let id = entry.id;
                self.store.insert_contact(contact);
                self.store.insert_entry(entry);
                id
            })
            .collect()
    }

    pub fn sent_count(&self, entries: &[Uuid]) -> usize {
        entries
            .iter()
            .filter_map(|id| self.store.entry(*id))
            .filter(|entry| entry.status == QueueStatus::Sent)
            .count()
    }
}
