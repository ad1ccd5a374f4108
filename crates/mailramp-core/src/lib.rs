//! MailRamp Core - Campaign dispatch engine
//!
//! This crate decides which queued campaign emails may go out, groups them
//! by sender under warm-up caps, sends them through a transactional email
//! provider, and closes campaigns once they are done.

pub mod dispatch;
pub mod provider;

pub use dispatch::{
    effective_limit, Clock, CycleSummary, DispatchContext, DispatchCycle, DispatchSettings,
    DispatchWorker, FixedClock, SystemClock,
};
pub use provider::{EmailProvider, OutboundEmail, ProviderError, ResendProvider};
