//! Test utilities and fixtures.
//!
//! Sample incidents plus handlers that record or reject what the router
//! hands them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::model::{BloodGroup, EmergencyContact, IncidentRecord, Location, VictimInfo};
use crate::router::{HandlerError, InboundMessage, MessageHandler};

/// Build an active incident with a fixed id and a plausible victim.
pub fn make_incident(incident_id: &str) -> IncidentRecord {
    let now = Utc::now();
    IncidentRecord {
        incident_id: incident_id.to_string(),
        timestamp: now,
        location: Location::new(12.9716, 77.5946),
        victim: VictimInfo {
            age: 34,
            blood_group: BloodGroup::OPositive,
            allergies: vec!["Peanuts".to_string(), "Latex".to_string()],
            medical_conditions: vec!["Asthma".to_string()],
            medications: vec!["Albuterol".to_string()],
            emergency_contact: EmergencyContact {
                name: "Jane Smith".to_string(),
                phone: "+91-987123456".to_string(),
                relationship: "Spouse".to_string(),
            },
        },
        vehicle_type: "car".to_string(),
        status: crate::model::IncidentStatus::Active,
        responder_id: None,
        acknowledged_at: None,
        resolved_at: None,
        created_at: now,
    }
}

/// Handler that keeps every message it receives.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<RwLock<Vec<InboundMessage>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of received messages, usable after the handler is boxed.
    pub fn received(&self) -> Arc<RwLock<Vec<InboundMessage>>> {
        Arc::clone(&self.received)
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(
        &self,
        message: Arc<InboundMessage>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        let received = Arc::clone(&self.received);
        Box::pin(async move {
            received.write().await.push((*message).clone());
            Ok(())
        })
    }
}

/// Handler that counts calls and then fails.
#[derive(Default)]
pub struct FailingHandler {
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl MessageHandler for FailingHandler {
    fn handle(
        &self,
        _message: Arc<InboundMessage>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(HandlerError::Rejected("test failure".to_string())) })
    }
}
