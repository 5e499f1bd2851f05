//! Incident persistence collaborator.
//!
//! The session core never owns storage. It talks to an injected
//! `IncidentStore`; the composing application decides what backs it.
//! `MemoryIncidentStore` is the in-process implementation used by the
//! binary and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::model::{IncidentRecord, IncidentStatus};

mod memory;
mod retention;

pub use memory::MemoryIncidentStore;
pub use retention::{
    spawn_retention_task, RetentionPolicy, RetentionTaskHandle, DEFAULT_RETENTION_DAYS,
    MAX_RETENTION_DAYS,
};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Incident not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence interface for incident records.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Insert a record, replacing any record with the same id.
    async fn insert(&self, incident: IncidentRecord) -> Result<()>;

    /// Fetch one record by id.
    async fn get(&self, incident_id: &str) -> Result<Option<IncidentRecord>>;

    /// Apply a status transition to a stored record.
    ///
    /// Follows `IncidentRecord::apply_status`: backward or repeated
    /// transitions leave the record unchanged. Returns whether it changed.
    async fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        at: DateTime<Utc>,
        responder_id: Option<&str>,
    ) -> Result<bool>;

    /// Records in `status`, newest first.
    async fn query_by_status(
        &self,
        status: IncidentStatus,
    ) -> Result<BoxStream<'static, IncidentRecord>>;

    /// Delete records created before `cutoff`. Returns how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of records in `status`.
    async fn count_by_status(&self, status: IncidentStatus) -> Result<usize>;

    /// Most recently created active record.
    async fn latest_active(&self) -> Result<Option<IncidentRecord>>;
}
