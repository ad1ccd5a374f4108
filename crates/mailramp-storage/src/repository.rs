//! Repository layer for data access

pub mod campaigns;
pub mod logs;
pub mod queue;
pub mod senders;

use crate::db::DatabasePool;
use async_trait::async_trait;
use mailramp_common::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::sync::Arc;

// Re-export concrete repository implementations with simple names
pub use campaigns::DbCampaignRepository;
pub use logs::DbDispatchLogRepository;
pub use queue::DbQueueRepository;
pub use senders::DbSenderRepository;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use logs::DispatchLogRepository;
pub use queue::QueueRepository;
pub use senders::SenderRepository;

/// Liveness check for a backing store
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl HealthCheck for DatabasePool {
    async fn health_check(&self) -> Result<()> {
        DatabasePool::health_check(self).await
    }
}

/// Every repository the dispatch engine talks to
#[derive(Clone)]
pub struct Repositories {
    pub queue: Arc<dyn QueueRepository>,
    pub senders: Arc<dyn SenderRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub logs: Arc<dyn DispatchLogRepository>,
    pub health: Arc<dyn HealthCheck>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            queue: Arc::new(DbQueueRepository::new(pool.clone())),
            senders: Arc::new(DbSenderRepository::new(pool.clone())),
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            logs: Arc::new(DbDispatchLogRepository::new(pool.clone())),
            health: Arc::new(pool),
        }
    }

    /// Repositories served by a single store implementing all of them
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: QueueRepository
            + SenderRepository
            + CampaignRepository
            + DispatchLogRepository
            + HealthCheck
            + 'static,
    {
        Self {
            queue: store.clone(),
            senders: store.clone(),
            campaigns: store.clone(),
            logs: store.clone(),
            health: store,
        }
    }
}

/// Decode a text column into a typed enum
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> std::result::Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}
