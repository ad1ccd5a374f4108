//! Batch Dispatcher - Claims, renders, sends and records one sender batch

use super::counters::SenderCounters;
use super::template::TemplateRenderer;
use crate::provider::{EmailProvider, MessageResult, OutboundEmail};
use chrono::{DateTime, Utc};
use mailramp_common::types::{format_mailbox, QueueEntryId};
use mailramp_common::{Error, Result};
use mailramp_storage::models::{DispatchCandidate, LogEvent, NewLogEntry, Sender};
use mailramp_storage::repository::{DispatchLogRepository, QueueRepository};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one dispatched batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Entries another worker claimed first
    pub lost_claims: usize,
}

impl BatchReport {
    pub fn absorb(&mut self, other: BatchReport) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.lost_claims += other.lost_claims;
    }
}

/// Sends sender batches through the provider
pub struct BatchDispatcher {
    queue: Arc<dyn QueueRepository>,
    logs: Arc<dyn DispatchLogRepository>,
    counters: SenderCounters,
    provider: Arc<dyn EmailProvider>,
    renderer: TemplateRenderer,
}

impl BatchDispatcher {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        logs: Arc<dyn DispatchLogRepository>,
        counters: SenderCounters,
        provider: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            queue,
            logs,
            counters,
            provider,
            renderer: TemplateRenderer::new(),
        }
    }

    fn render(&self, sender: &Sender, candidate: &DispatchCandidate) -> OutboundEmail {
        OutboundEmail {
            from: format_mailbox(sender.display_name.as_deref(), &sender.email),
            to: candidate.contact.email.clone(),
            subject: self
                .renderer
                .render(&candidate.campaign.subject, &candidate.contact),
            html: self
                .renderer
                .render(&candidate.campaign.html_template, &candidate.contact),
        }
    }

    /// Dispatch one batch of a single sender.
    ///
    /// Only entries this call manages to claim are sent. Terminal updates
    /// are conditional on `processing`, so entries already finished are
    /// never rewritten.
    pub async fn dispatch(
        &self,
        sender: &Sender,
        batch: Vec<DispatchCandidate>,
        now: DateTime<Utc>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        let ids: Vec<QueueEntryId> = batch.iter().map(|c| c.entry.id).collect();
        let claimed: HashSet<QueueEntryId> = self
            .queue
            .claim_entries(&ids, now)
            .await?
            .into_iter()
            .collect();
        let batch: Vec<DispatchCandidate> = batch
            .into_iter()
            .filter(|c| claimed.contains(&c.entry.id))
            .collect();
        report.lost_claims = ids.len() - batch.len();
        if report.lost_claims > 0 {
            debug!(
                sender_id = %sender.id,
                lost = report.lost_claims,
                "Some entries were claimed elsewhere"
            );
        }
        if batch.is_empty() {
            return Ok(report);
        }

        let emails: Vec<OutboundEmail> = batch.iter().map(|c| self.render(sender, c)).collect();
        let mut logs = Vec::with_capacity(batch.len());
        let mut first_error: Option<Error> = None;
        // Messages the provider took, whether or not their status was recorded
        let mut delivered = 0;

        match self.provider.send_batch(&emails).await {
            Err(e) => {
                let message = e.to_string();
                error!(
                    sender_id = %sender.id,
                    provider = self.provider.name(),
                    count = batch.len(),
                    "Batch send failed: {}",
                    message
                );
                for candidate in &batch {
                    match self.queue.mark_failed(candidate.entry.id, &message, now).await {
                        Ok(true) => {
                            report.failed += 1;
                            logs.push(
                                NewLogEntry::entry(&candidate.entry, LogEvent::Failed, message.clone())
                                    .with_metadata(serde_json::json!({ "scope": "batch" })),
                            );
                        }
                        Ok(false) => {
                            warn!(entry_id = %candidate.entry.id, "Entry left processing before failure was recorded");
                        }
                        Err(e) => {
                            error!(entry_id = %candidate.entry.id, "Failed to record batch failure: {}", e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            Ok(outcome) => {
                for (index, candidate) in batch.iter().enumerate() {
                    match outcome.result_for(index) {
                        MessageResult::Accepted { id } => {
                            delivered += 1;
                            match self
                                .queue
                                .mark_sent(candidate.entry.id, id.as_deref(), now)
                                .await
                            {
                                Ok(true) => {
                                    report.sent += 1;
                                    logs.push(
                                        NewLogEntry::entry(
                                            &candidate.entry,
                                            LogEvent::Sent,
                                            format!("Sent to {}", candidate.contact.email),
                                        )
                                        .with_metadata(serde_json::json!({
                                            "provider_message_id": id,
                                        })),
                                    );
                                }
                                Ok(false) => {
                                    warn!(entry_id = %candidate.entry.id, "Entry left processing before send was recorded");
                                }
                                Err(e) => {
                                    error!(entry_id = %candidate.entry.id, "Failed to record send: {}", e);
                                    first_error.get_or_insert(e);
                                }
                            }
                        }
                        MessageResult::Rejected { error } => {
                            match self.queue.mark_failed(candidate.entry.id, &error, now).await {
                                Ok(true) => {
                                    report.failed += 1;
                                    logs.push(
                                        NewLogEntry::entry(&candidate.entry, LogEvent::Failed, error)
                                            .with_metadata(serde_json::json!({ "scope": "message" })),
                                    );
                                }
                                Ok(false) => {
                                    warn!(entry_id = %candidate.entry.id, "Entry left processing before rejection was recorded");
                                }
                                Err(e) => {
                                    error!(entry_id = %candidate.entry.id, "Failed to record rejection: {}", e);
                                    first_error.get_or_insert(e);
                                }
                            }
                        }
                    }
                }
                info!(
                    sender_id = %sender.id,
                    sent = report.sent,
                    failed = report.failed,
                    "Batch dispatched"
                );
            }
        }

        // Logs and counters are written for whatever was recorded, even when
        // an entry update failed; the first storage error is returned after.
        if let Err(e) = self.logs.append_logs(logs).await {
            error!(sender_id = %sender.id, "Failed to append dispatch logs: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.counters.record_sent(sender.id, delivered, now).await {
            error!(sender_id = %sender.id, "Failed to update sender counter: {}", e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{at, Fixture, ScriptedProvider};
    use crate::provider::{BatchOutcome, ProviderError};
    use mailramp_storage::models::QueueStatus;
    use pretty_assertions::assert_eq;

    fn dispatcher(fixture: &Fixture, provider: Arc<ScriptedProvider>) -> BatchDispatcher {
        BatchDispatcher::new(
            fixture.store.clone(),
            fixture.store.clone(),
            SenderCounters::new(fixture.store.clone()),
            provider,
        )
    }

    #[tokio::test]
    async fn test_successful_batch_marks_sent() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 3, at(8, 0));
        let provider = Arc::new(ScriptedProvider::accepting());

        let batch = fixture.candidates(&entries);
        let report = dispatcher(&fixture, provider.clone())
            .dispatch(&sender, batch, at(10, 0))
            .await
            .unwrap();

        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 0);
        for entry in &entries {
            let stored = fixture.store.entry(entry.id).unwrap();
            assert_eq!(stored.status, QueueStatus::Sent);
            assert_eq!(stored.sent_at, Some(at(10, 0)));
            assert!(stored.provider_message_id.is_some());
        }
        assert_eq!(fixture.store.sender(sender.id).unwrap().emails_sent_today, 3);
        assert_eq!(provider.calls(), 1);

        let sent_logs = fixture
            .store
            .logs()
            .into_iter()
            .filter(|l| l.event == LogEvent::Sent)
            .count();
        assert_eq!(sent_logs, 3);
    }

    #[tokio::test]
    async fn test_renders_per_contact() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 1, at(8, 0));
        let provider = Arc::new(ScriptedProvider::accepting());

        dispatcher(&fixture, provider.clone())
            .dispatch(&sender, fixture.candidates(&entries), at(10, 0))
            .await
            .unwrap();

        let sent = provider.batches();
        let email = &sent[0][0];
        let contact = fixture.store_contact(entries[0].contact_id);
        assert_eq!(email.to, contact.email);
        assert_eq!(email.from, format!("Warmup Team <{}>", sender.email));
        assert_eq!(email.html, format!("<p>Hello {}</p>", contact.first_name.unwrap()));
    }

    #[tokio::test]
    async fn test_provider_error_fails_every_entry() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 4, at(8, 0));
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Api {
            status: 500,
            message: "upstream down".to_string(),
        })]));

        let report = dispatcher(&fixture, provider)
            .dispatch(&sender, fixture.candidates(&entries), at(10, 0))
            .await
            .unwrap();

        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 4);
        for entry in &entries {
            let stored = fixture.store.entry(entry.id).unwrap();
            assert_eq!(stored.status, QueueStatus::Failed);
            assert_eq!(stored.retry_count, 1);
            assert!(stored.error_message.unwrap().contains("upstream down"));
        }
        assert_eq!(fixture.store.sender(sender.id).unwrap().emails_sent_today, 0);
        let failed_logs = fixture
            .store
            .logs()
            .into_iter()
            .filter(|l| l.event == LogEvent::Failed)
            .count();
        assert_eq!(failed_logs, 4);
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 2, at(8, 0));
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(BatchOutcome {
            results: vec![
                MessageResult::Rejected {
                    error: "bad address".to_string(),
                },
                MessageResult::Accepted {
                    id: Some("msg_ok".to_string()),
                },
            ],
        })]));

        let report = dispatcher(&fixture, provider)
            .dispatch(&sender, fixture.candidates(&entries), at(10, 0))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            fixture.store.entry(entries[0].id).unwrap().status,
            QueueStatus::Failed
        );
        let ok = fixture.store.entry(entries[1].id).unwrap();
        assert_eq!(ok.status, QueueStatus::Sent);
        assert_eq!(ok.provider_message_id.as_deref(), Some("msg_ok"));
        assert_eq!(fixture.store.sender(sender.id).unwrap().emails_sent_today, 1);
    }

    #[tokio::test]
    async fn test_already_claimed_entries_not_sent() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 2, at(8, 0));
        let batch = fixture.candidates(&entries);

        // Another worker takes the first entry
        fixture
            .store
            .claim_entries(&[entries[0].id], at(9, 59))
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::accepting());
        let report = dispatcher(&fixture, provider.clone())
            .dispatch(&sender, batch, at(10, 0))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.lost_claims, 1);
        assert_eq!(provider.batches()[0].len(), 1);
        assert_eq!(
            fixture.store.entry(entries[0].id).unwrap().status,
            QueueStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_storage_error_still_records_counters_and_logs() {
        let fixture = Fixture::new();
        let sender = fixture.sender(100);
        let campaign = fixture.sending_campaign();
        let entries = fixture.pending_entries(&campaign, &sender, 4, at(8, 0));
        let provider = Arc::new(ScriptedProvider::accepting());
        fixture.store.fail_entry_writes_after(2);

        let result = dispatcher(&fixture, provider)
            .dispatch(&sender, fixture.candidates(&entries), at(10, 0))
            .await;

        assert!(result.is_err());
        let statuses: Vec<_> = entries
            .iter()
            .map(|e| fixture.store.entry(e.id).unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                QueueStatus::Sent,
                QueueStatus::Sent,
                QueueStatus::Processing,
                QueueStatus::Processing,
            ]
        );
        // All four reached the provider, so all four count against the cap
        assert_eq!(fixture.store.sender(sender.id).unwrap().emails_sent_today, 4);
        let sent_logs = fixture
            .store
            .logs()
            .into_iter()
            .filter(|l| l.event == LogEvent::Sent)
            .count();
        assert_eq!(sent_logs, 2);
    }
}
