//! Incident tracker.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::model::{IncidentRecord, IncidentStatus, StatusEnvelope};
use crate::router::{HandlerError, InboundMessage, MessageHandler};
use crate::store::{IncidentStore, StoreError};

/// Keeps the incident store in step with what arrives from the broker.
///
/// Alerts insert new records. Status envelopes move records forward.
/// Duplicate or out-of-order deliveries never move a record backward, so
/// redelivery under at-least-once is harmless.
#[derive(Clone)]
pub struct IncidentTracker {
    store: Arc<dyn IncidentStore>,
}

impl IncidentTracker {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }
}

impl MessageHandler for IncidentTracker {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let store = Arc::clone(&self.store);

        Box::pin(async move {
            match &*message {
                InboundMessage::Alert(incident) => track_alert(store.as_ref(), incident).await,
                InboundMessage::Status(envelope) => track_status(store.as_ref(), envelope).await,
                InboundMessage::Response(envelope) => {
                    debug!(
                        incident_id = %envelope.incident_id,
                        responder_id = ?envelope.responder_id,
                        "Response carries no state change"
                    );
                    Ok(())
                }
            }
        })
    }
}

async fn track_alert(
    store: &dyn IncidentStore,
    incident: &IncidentRecord,
) -> Result<(), HandlerError> {
    let Some(existing) = store.get(&incident.incident_id).await? else {
        info!(
            incident_id = %incident.incident_id,
            vehicle_type = %incident.vehicle_type,
            "Tracking new incident"
        );
        store.insert(incident.clone()).await?;
        return Ok(());
    };

    // redelivered alert: only ever move the stored record forward
    if !existing.status.can_advance_to(incident.status) {
        debug!(incident_id = %incident.incident_id, "Duplicate alert ignored");
        return Ok(());
    }
    let at = match incident.status {
        IncidentStatus::Resolved => incident.resolved_at,
        _ => incident.acknowledged_at,
    }
    .unwrap_or(incident.timestamp);
    store
        .update_status(
            &incident.incident_id,
            incident.status,
            at,
            incident.responder_id.as_deref(),
        )
        .await?;
    Ok(())
}

async fn track_status(
    store: &dyn IncidentStore,
    envelope: &StatusEnvelope,
) -> Result<(), HandlerError> {
    let result = store
        .update_status(
            &envelope.incident_id,
            envelope.status,
            envelope.timestamp,
            envelope.responder_id.as_deref(),
        )
        .await;

    match result {
        Ok(true) => {
            info!(
                incident_id = %envelope.incident_id,
                status = ?envelope.status,
                responder_id = ?envelope.responder_id,
                "Incident status updated"
            );
            Ok(())
        }
        Ok(false) => {
            debug!(
                incident_id = %envelope.incident_id,
                status = ?envelope.status,
                "Status already applied"
            );
            Ok(())
        }
        Err(StoreError::NotFound(incident_id)) => {
            debug!(incident_id = %incident_id, "Status for unknown incident ignored");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
