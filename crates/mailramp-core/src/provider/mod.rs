//! Email Provider Module - Transactional email delivery backends

mod resend;

pub use resend::ResendProvider;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// One rendered message ready for the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Provider verdict for one message of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageResult {
    /// Accepted; the provider id may be absent
    Accepted { id: Option<String> },
    /// Rejected individually while the rest of the batch went through
    Rejected { error: String },
}

/// Per-message results, positionally aligned with the submitted batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<MessageResult>,
}

impl BatchOutcome {
    /// Every message accepted with the given ids
    pub fn accepted<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        Self {
            results: ids
                .into_iter()
                .map(|id| MessageResult::Accepted { id })
                .collect(),
        }
    }

    /// Result for the message at `index`. Positions the provider did not
    /// report count as accepted without an id.
    pub fn result_for(&self, index: usize) -> MessageResult {
        self.results
            .get(index)
            .cloned()
            .unwrap_or(MessageResult::Accepted { id: None })
    }
}

/// Provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Transactional email provider
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Send a batch of messages in one call.
    ///
    /// `Err` means the whole batch failed. `Ok` may still carry individual
    /// rejections.
    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<BatchOutcome, ProviderError>;
}
