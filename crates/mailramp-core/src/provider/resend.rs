//! Resend batch API client

use super::{BatchOutcome, EmailProvider, MessageResult, OutboundEmail, ProviderError};
use async_trait::async_trait;
use mailramp_common::config::ProviderConfig;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Resend batch response
#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    data: Vec<BatchItem>,
    #[serde(default)]
    errors: Vec<BatchItemError>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchItemError {
    index: usize,
    message: String,
}

/// Resend error body
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    error: Option<String>,
}

/// Client for `POST /emails/batch`
pub struct ResendProvider {
    base_url: String,
    api_key: String,
    client: Client,
}

impl ResendProvider {
    /// Create a new Resend client
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("Resend API key missing".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn parse_outcome(body: &str, submitted: usize) -> BatchOutcome {
        let parsed: BatchResponse = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Unreadable Resend batch response, treating as accepted: {}", e);
                return BatchOutcome::accepted(std::iter::repeat(None).take(submitted));
            }
        };

        let mut results: Vec<MessageResult> = (0..submitted)
            .map(|i| MessageResult::Accepted {
                id: parsed.data.get(i).and_then(|item| item.id.clone()),
            })
            .collect();

        // With per-item errors, `data` only lists the accepted messages in order
        if !parsed.errors.is_empty() {
            let mut accepted_ids = parsed.data.iter().map(|item| item.id.clone());
            for (index, slot) in results.iter_mut().enumerate() {
                *slot = match parsed.errors.iter().find(|e| e.index == index) {
                    Some(rejected) => MessageResult::Rejected {
                        error: rejected.message.clone(),
                    },
                    None => MessageResult::Accepted {
                        id: accepted_ids.next().flatten(),
                    },
                };
            }
        }

        BatchOutcome { results }
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    fn name(&self) -> &str {
        "resend"
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<BatchOutcome, ProviderError> {
        if emails.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let url = format!("{}/emails/batch", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(emails)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.message.or(e.error))
                .unwrap_or_else(|| {
                    if body.is_empty() {
                        status.to_string()
                    } else {
                        body.clone()
                    }
                });
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(count = emails.len(), "Resend batch accepted");
        Ok(Self::parse_outcome(&body, emails.len()))
    }
}
