//! Status and response envelopes.
//!
//! Envelopes are never persisted. They exist only on the wire and are
//! consumed to update an `IncidentRecord`.

use chrono::{DateTime, Utc};

use super::IncidentStatus;

/// Status change announced on `crash/status/{incident_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEnvelope {
    pub incident_id: String,
    pub status: IncidentStatus,
    pub responder_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn now(
        incident_id: impl Into<String>,
        status: IncidentStatus,
        responder_id: Option<String>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            status,
            responder_id,
            timestamp: Utc::now(),
        }
    }
}

/// Free-form responder reply on `crash/responses/{incident_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub incident_id: String,
    pub response: String,
    pub responder_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResponseEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn now(
        incident_id: impl Into<String>,
        response: impl Into<String>,
        responder_id: Option<String>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            response: response.into(),
            responder_id,
            timestamp: Utc::now(),
        }
    }
}
