//! Retention sweep for old incident records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{IncidentStore, Result};

/// Default number of days an incident is kept.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Largest accepted retention window, about a century.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Deletes records older than the retention window, at most once per day.
pub struct RetentionPolicy {
    retention: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention: Duration::days(i64::from(retention_days)),
            sweep_interval: Duration::days(1),
            last_sweep: Mutex::new(None),
        }
    }

    /// Records created before this instant are eligible for deletion.
    ///
    /// Saturates at the earliest representable instant.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run the sweep if a day has passed since the last one.
    ///
    /// Returns the number of deleted records, or `None` when the sweep was
    /// not due. A failed sweep is not recorded, so the next call retries.
    pub async fn sweep_if_due(
        &self,
        store: &dyn IncidentStore,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut last_sweep = self.last_sweep.lock().await;
        if let Some(last) = *last_sweep {
            if now - last < self.sweep_interval {
                debug!(last_sweep = %last, "Retention sweep not due");
                return Ok(None);
            }
        }

        let cutoff = self.cutoff(now);
        let removed = store.delete_older_than(cutoff).await?;
        *last_sweep = Some(now);

        info!(removed, cutoff = %cutoff, "Retention sweep completed");
        Ok(Some(removed))
    }
}

/// Handle to a running retention task.
pub struct RetentionTaskHandle {
    cancel: tokio::sync::watch::Sender<bool>,
}

impl RetentionTaskHandle {
    /// Signal the retention task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Spawn a background task that checks the retention policy periodically.
///
/// The first check runs immediately.
pub fn spawn_retention_task(
    store: Arc<dyn IncidentStore>,
    policy: Arc<RetentionPolicy>,
    check_interval: std::time::Duration,
) -> RetentionTaskHandle {
    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        info!(
            check_interval_secs = check_interval.as_secs(),
            "Retention task started"
        );

        loop {
            if let Err(e) = policy.sweep_if_due(store.as_ref(), Utc::now()).await {
                error!(error = %e, "Retention sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {}
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!("Retention task stopped");
                        break;
                    }
                }
            }
        }
    });

    RetentionTaskHandle { cancel: cancel_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncidentRecord;
    use crate::store::{MemoryIncidentStore, StoreError};
    use crate::test_utils::make_incident;

    fn created_at(id: &str, at: DateTime<Utc>) -> IncidentRecord {
        let mut incident = make_incident(id);
        incident.created_at = at;
        incident
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_records() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        store
            .insert(created_at("expired", now - Duration::days(8)))
            .await
            .unwrap();
        store
            .insert(created_at("recent", now - Duration::days(6)))
            .await
            .unwrap();

        let policy = RetentionPolicy::default();
        let removed = policy.sweep_if_due(&store, now).await.unwrap();

        assert_eq!(removed, Some(1));
        assert!(store.get("expired").await.unwrap().is_none());
        assert!(store.get("recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_runs_at_most_once_per_day() {
        let store = MemoryIncidentStore::new();
        let policy = RetentionPolicy::new(7);
        let now = Utc::now();

        assert_eq!(policy.sweep_if_due(&store, now).await.unwrap(), Some(0));

        store
            .insert(created_at("expired", now - Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(
            policy
                .sweep_if_due(&store, now + Duration::hours(23))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            policy
                .sweep_if_due(&store, now + Duration::hours(24))
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_failed_sweep_is_retried() {
        let store = MemoryIncidentStore::new();
        let policy = RetentionPolicy::new(7);
        let now = Utc::now();

        store.set_fail_on_write(true).await;
        assert!(matches!(
            policy.sweep_if_due(&store, now).await,
            Err(StoreError::Backend(_))
        ));

        store.set_fail_on_write(false).await;
        assert_eq!(policy.sweep_if_due(&store, now).await.unwrap(), Some(0));
    }

    #[test]
    fn test_cutoff_uses_retention_days() {
        let policy = RetentionPolicy::new(3);
        let now = Utc::now();
        assert_eq!(policy.cutoff(now), now - Duration::days(3));
    }

    #[tokio::test]
    async fn test_huge_retention_saturates_cutoff() {
        let store = MemoryIncidentStore::new();
        store.insert(make_incident("kept")).await.unwrap();
        let policy = RetentionPolicy::new(u32::MAX);

        assert_eq!(policy.cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            policy.sweep_if_due(&store, Utc::now()).await.unwrap(),
            Some(0)
        );
        assert!(store.get("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retention_task_sweeps_and_stops() {
        let store = Arc::new(MemoryIncidentStore::new());
        store
            .insert(created_at("expired", Utc::now() - Duration::days(10)))
            .await
            .unwrap();

        let handle = spawn_retention_task(
            store.clone(),
            Arc::new(RetentionPolicy::default()),
            std::time::Duration::from_millis(10),
        );

        for _ in 0..50 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.stop();

        assert!(store.is_empty().await);
    }
}
