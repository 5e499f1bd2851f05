//! In-memory incident store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use tracing::debug;

use super::{IncidentStore, Result, StoreError};
use crate::model::{IncidentRecord, IncidentStatus};

/// Incident store that keeps records in a map.
#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<HashMap<String, IncidentRecord>>,
    fail_on_write: RwLock<bool>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with `StoreError::Backend`.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.incidents.read().await.is_empty()
    }

    async fn check_writable(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(StoreError::Backend("Memory store write failure".to_string()));
        }
        Ok(())
    }

    /// Matching records, newest first.
    async fn snapshot(&self, status: IncidentStatus) -> Vec<IncidentRecord> {
        let store = self.incidents.read().await;
        let mut matching: Vec<IncidentRecord> = store
            .values()
            .filter(|incident| incident.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn insert(&self, incident: IncidentRecord) -> Result<()> {
        self.check_writable().await?;
        debug!(incident_id = %incident.incident_id, "Storing incident");
        self.incidents
            .write()
            .await
            .insert(incident.incident_id.clone(), incident);
        Ok(())
    }

    async fn get(&self, incident_id: &str) -> Result<Option<IncidentRecord>> {
        Ok(self.incidents.read().await.get(incident_id).cloned())
    }

    async fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        at: DateTime<Utc>,
        responder_id: Option<&str>,
    ) -> Result<bool> {
        self.check_writable().await?;
        let mut store = self.incidents.write().await;
        let incident = store
            .get_mut(incident_id)
            .ok_or_else(|| StoreError::NotFound(incident_id.to_string()))?;
        Ok(incident.apply_status(status, responder_id, at))
    }

    async fn query_by_status(
        &self,
        status: IncidentStatus,
    ) -> Result<BoxStream<'static, IncidentRecord>> {
        Ok(stream::iter(self.snapshot(status).await).boxed())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.check_writable().await?;
        let mut store = self.incidents.write().await;
        let before = store.len();
        store.retain(|_, incident| incident.created_at >= cutoff);
        Ok(before - store.len())
    }

    async fn count_by_status(&self, status: IncidentStatus) -> Result<usize> {
        let store = self.incidents.read().await;
        Ok(store.values().filter(|i| i.status == status).count())
    }

    async fn latest_active(&self) -> Result<Option<IncidentRecord>> {
        Ok(self
            .snapshot(IncidentStatus::Active)
            .await
            .into_iter()
            .next())
    }
}
