//! Incident record and its victim details.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Youngest victim age accepted in an incident record.
pub const MIN_VICTIM_AGE: u8 = 18;
/// Oldest victim age accepted in an incident record.
pub const MAX_VICTIM_AGE: u8 = 99;

/// ABO/Rh blood group of the victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BloodGroup {
    APositive,
    ANegative,
    BPositive,
    BNegative,
    AbPositive,
    AbNegative,
    OPositive,
    ONegative,
}

impl BloodGroup {
    /// Every blood group, in declaration order.
    pub const ALL: [BloodGroup; 8] = [
        Self::APositive,
        Self::ANegative,
        Self::BPositive,
        Self::BNegative,
        Self::AbPositive,
        Self::AbNegative,
        Self::OPositive,
        Self::ONegative,
    ];
}

/// Incident lifecycle status.
///
/// Variants are declared in lifecycle order, so `Ord` doubles as the
/// monotonicity check: a status may only move to a strictly greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IncidentStatus {
    /// Raised by the publisher, nobody has responded yet.
    Active,
    /// A responder has taken the incident.
    Acknowledged,
    /// The incident is closed.
    Resolved,
}

impl IncidentStatus {
    /// Returns true if moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: IncidentStatus) -> bool {
        next > self
    }
}

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Person to call on behalf of the victim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

/// Medical profile of the victim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VictimInfo {
    pub age: u8,
    pub blood_group: BloodGroup,
    pub allergies: Vec<String>,
    pub medical_conditions: Vec<String>,
    pub medications: Vec<String>,
    pub emergency_contact: EmergencyContact,
}

/// One emergency event.
///
/// Created by the alerting side at trigger time. The responding side only
/// mutates the status fields, through `acknowledge`, `resolve` or
/// `apply_status`. All three are idempotent: re-applying the current (or an
/// earlier) status leaves the record untouched and returns `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    pub incident_id: String,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub victim: VictimInfo,
    pub vehicle_type: String,
    pub status: IncidentStatus,
    pub responder_id: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    /// Create a new active incident with a fresh id, stamped now.
    pub fn new(location: Location, victim: VictimInfo, vehicle_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            incident_id: Uuid::new_v4().to_string(),
            timestamp: now,
            location,
            victim,
            vehicle_type: vehicle_type.into(),
            status: IncidentStatus::Active,
            responder_id: None,
            acknowledged_at: None,
            resolved_at: None,
            created_at: now,
        }
    }

    /// Mark the incident as taken by `responder_id`.
    ///
    /// Returns `true` if the record changed.
    pub fn acknowledge(&mut self, responder_id: &str, at: DateTime<Utc>) -> bool {
        self.apply_status(IncidentStatus::Acknowledged, Some(responder_id), at)
    }

    /// Close the incident.
    ///
    /// Returns `true` if the record changed.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        self.apply_status(IncidentStatus::Resolved, None, at)
    }

    /// Apply a status received from a responder.
    ///
    /// Backward or repeated transitions are no-ops. `responder_id` is only
    /// recorded on acknowledgement; timestamps are set once and never
    /// overwritten.
    pub fn apply_status(
        &mut self,
        status: IncidentStatus,
        responder_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }

        match status {
            IncidentStatus::Active => return false,
            IncidentStatus::Acknowledged => {
                if self.responder_id.is_none() {
                    self.responder_id = responder_id.map(str::to_string);
                }
                self.acknowledged_at.get_or_insert(at);
            }
            IncidentStatus::Resolved => {
                self.resolved_at.get_or_insert(at);
            }
        }

        self.status = status;
        true
    }
}
