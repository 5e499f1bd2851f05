//! Incident data model.
//!
//! This module contains:
//! - `IncidentRecord`: one emergency event exchanged between publishers and responders
//! - `IncidentStatus`: monotonic lifecycle (active → acknowledged → resolved)
//! - `StatusEnvelope` / `ResponseEnvelope`: transient wire messages
//! - `ConnectionState`: broker session lifecycle
//!
//! None of these types know about the wire format. The codec module is the
//! single place where in-memory names are translated to wire names.

mod envelope;
mod incident;

pub use envelope::{ResponseEnvelope, StatusEnvelope};
pub use incident::{
    BloodGroup, EmergencyContact, IncidentRecord, IncidentStatus, Location, VictimInfo,
    MAX_VICTIM_AGE, MIN_VICTIM_AGE,
};

/// Lifecycle of the broker session owned by `SessionManager`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, or the link was lost.
    #[default]
    Disconnected,
    /// A connect attempt is outstanding.
    Connecting,
    /// The session is established.
    Connected,
    /// The last connect attempt failed.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
