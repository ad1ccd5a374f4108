//! Common types for MailRamp

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for sending identities
pub type SenderId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for contact groups
pub type GroupId = Uuid;

/// Unique identifier for queue entries
pub type QueueEntryId = Uuid;

/// Unique identifier for dispatch log entries
pub type LogEntryId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Format a mailbox header value (`Name <address>` or the bare address)
pub fn format_mailbox(display_name: Option<&str>, address: &str) -> String {
    match display_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} <{}>", name, address),
        None => address.to_string(),
    }
}
