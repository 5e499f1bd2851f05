//! Logging handler for the presentation side.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::codec::blood_group_token;
use crate::router::{HandlerError, InboundMessage, MessageHandler};

/// Handler that logs every inbound message.
///
/// With notifications enabled, new alerts are raised at warn level so they
/// stand out; otherwise they are logged at debug level like everything else
/// that is not a status change.
pub struct LogHandler {
    notifications_enabled: bool,
}

impl LogHandler {
    pub fn new(notifications_enabled: bool) -> Self {
        Self {
            notifications_enabled,
        }
    }
}

impl MessageHandler for LogHandler {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let notify = self.notifications_enabled;

        Box::pin(async move {
            match &*message {
                InboundMessage::Alert(incident) if notify => warn!(
                    incident_id = %incident.incident_id,
                    latitude = incident.location.latitude,
                    longitude = incident.location.longitude,
                    vehicle_type = %incident.vehicle_type,
                    victim_age = incident.victim.age,
                    blood_group = blood_group_token(incident.victim.blood_group),
                    allergies = ?incident.victim.allergies,
                    "Crash alert received"
                ),
                InboundMessage::Alert(incident) => debug!(
                    incident_id = %incident.incident_id,
                    "Crash alert received (notifications off)"
                ),
                InboundMessage::Status(envelope) => info!(
                    incident_id = %envelope.incident_id,
                    status = ?envelope.status,
                    responder_id = ?envelope.responder_id,
                    "Incident status changed"
                ),
                InboundMessage::Response(envelope) => info!(
                    incident_id = %envelope.incident_id,
                    responder_id = ?envelope.responder_id,
                    response = %envelope.response,
                    "Responder replied"
                ),
            }
            Ok(())
        })
    }
}
