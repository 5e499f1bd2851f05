//! Payload codec.
//!
//! Deterministic JSON encode/decode of incident records and envelopes. The
//! wire DTOs in this module carry the fixed snake_case field names and the
//! short enum tokens (`"A+"`, `"active"`, ...); the model types never see
//! them. Unknown enum tokens are rejected, never defaulted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{
    BloodGroup, EmergencyContact, IncidentRecord, IncidentStatus, Location, ResponseEnvelope,
    StatusEnvelope, VictimInfo, MAX_VICTIM_AGE, MIN_VICTIM_AGE,
};

/// Errors raised while decoding an inbound payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    Invalid(String),
}

/// Errors raised while encoding an outbound payload.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Refusing to encode invalid record: {0}")]
    Invalid(String),
}

// ============================================================================
// Public API
// ============================================================================

/// Encode a full incident record for `crash/alerts/*`.
pub fn encode_incident(incident: &IncidentRecord) -> Result<Vec<u8>, EncodeError> {
    check_location(&incident.location).map_err(EncodeError::Invalid)?;
    check_age(i64::from(incident.victim.age)).map_err(EncodeError::Invalid)?;
    Ok(serde_json::to_vec(&WireIncident::from(incident))?)
}

/// Decode a full incident record.
pub fn decode_incident(payload: &[u8]) -> Result<IncidentRecord, DecodeError> {
    let wire: WireIncident = serde_json::from_str(std::str::from_utf8(payload)?)?;
    wire.try_into()
}

/// Encode a status envelope for `crash/status/*`.
pub fn encode_status(envelope: &StatusEnvelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&WireStatus::from(envelope))?)
}

/// Decode a status envelope.
pub fn decode_status(payload: &[u8]) -> Result<StatusEnvelope, DecodeError> {
    let wire: WireStatus = serde_json::from_str(std::str::from_utf8(payload)?)?;
    check_incident_id(&wire.incident_id)?;
    Ok(StatusEnvelope {
        incident_id: wire.incident_id,
        status: wire.status.into(),
        responder_id: wire.responder_id,
        timestamp: wire.timestamp,
    })
}

/// Encode a response envelope for `crash/responses/*`.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&WireResponse::from(envelope))?)
}

/// Decode a response envelope.
pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope, DecodeError> {
    let wire: WireResponse = serde_json::from_str(std::str::from_utf8(payload)?)?;
    check_incident_id(&wire.incident_id)?;
    Ok(ResponseEnvelope {
        incident_id: wire.incident_id,
        response: wire.response,
        responder_id: wire.responder_id,
        timestamp: wire.timestamp,
    })
}

/// External token for a blood group.
pub fn blood_group_token(group: BloodGroup) -> &'static str {
    match group {
        BloodGroup::APositive => "A+",
        BloodGroup::ANegative => "A-",
        BloodGroup::BPositive => "B+",
        BloodGroup::BNegative => "B-",
        BloodGroup::AbPositive => "AB+",
        BloodGroup::AbNegative => "AB-",
        BloodGroup::OPositive => "O+",
        BloodGroup::ONegative => "O-",
    }
}

// ============================================================================
// Validation
// ============================================================================

fn check_incident_id(id: &str) -> Result<(), DecodeError> {
    if id.trim().is_empty() {
        return Err(DecodeError::Invalid("incident_id is empty".to_string()));
    }
    Ok(())
}

fn check_age(age: i64) -> Result<u8, String> {
    let range = i64::from(MIN_VICTIM_AGE)..=i64::from(MAX_VICTIM_AGE);
    if !range.contains(&age) {
        return Err(format!(
            "victim age {} outside {}..={}",
            age, MIN_VICTIM_AGE, MAX_VICTIM_AGE
        ));
    }
    // Range-checked above
    Ok(age as u8)
}

fn check_location(location: &Location) -> Result<(), String> {
    if !location.latitude.is_finite() || !(-90.0..=90.0).contains(&location.latitude) {
        return Err(format!("latitude {} out of range", location.latitude));
    }
    if !location.longitude.is_finite() || !(-180.0..=180.0).contains(&location.longitude) {
        return Err(format!("longitude {} out of range", location.longitude));
    }
    Ok(())
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum WireBloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl From<BloodGroup> for WireBloodGroup {
    fn from(group: BloodGroup) -> Self {
        match group {
            BloodGroup::APositive => Self::APositive,
            BloodGroup::ANegative => Self::ANegative,
            BloodGroup::BPositive => Self::BPositive,
            BloodGroup::BNegative => Self::BNegative,
            BloodGroup::AbPositive => Self::AbPositive,
            BloodGroup::AbNegative => Self::AbNegative,
            BloodGroup::OPositive => Self::OPositive,
            BloodGroup::ONegative => Self::ONegative,
        }
    }
}

impl From<WireBloodGroup> for BloodGroup {
    fn from(group: WireBloodGroup) -> Self {
        match group {
            WireBloodGroup::APositive => Self::APositive,
            WireBloodGroup::ANegative => Self::ANegative,
            WireBloodGroup::BPositive => Self::BPositive,
            WireBloodGroup::BNegative => Self::BNegative,
            WireBloodGroup::AbPositive => Self::AbPositive,
            WireBloodGroup::AbNegative => Self::AbNegative,
            WireBloodGroup::OPositive => Self::OPositive,
            WireBloodGroup::ONegative => Self::ONegative,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireStatusToken {
    Active,
    Acknowledged,
    Resolved,
}

impl From<IncidentStatus> for WireStatusToken {
    fn from(status: IncidentStatus) -> Self {
        match status {
            IncidentStatus::Active => Self::Active,
            IncidentStatus::Acknowledged => Self::Acknowledged,
            IncidentStatus::Resolved => Self::Resolved,
        }
    }
}

impl From<WireStatusToken> for IncidentStatus {
    fn from(status: WireStatusToken) -> Self {
        match status {
            WireStatusToken::Active => Self::Active,
            WireStatusToken::Acknowledged => Self::Acknowledged,
            WireStatusToken::Resolved => Self::Resolved,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContact {
    name: String,
    phone: String,
    relationship: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireVictim {
    age: i64,
    blood_group: WireBloodGroup,
    #[serde(default)]
    allergies: Vec<String>,
    #[serde(default)]
    medical_conditions: Vec<String>,
    #[serde(default)]
    medications: Vec<String>,
    emergency_contact: WireContact,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireIncident {
    incident_id: String,
    #[serde(deserialize_with = "instant")]
    timestamp: DateTime<Utc>,
    location: WireLocation,
    victim: WireVictim,
    vehicle_type: String,
    status: WireStatusToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    responder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "instant")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireStatus {
    incident_id: String,
    status: WireStatusToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    responder_id: Option<String>,
    #[serde(deserialize_with = "instant")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResponse {
    incident_id: String,
    response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    responder_id: Option<String>,
    #[serde(deserialize_with = "instant")]
    timestamp: DateTime<Utc>,
}

/// Accepts RFC 3339 strings and, from older publishers, epoch milliseconds.
fn instant<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Instant {
        Rfc3339(DateTime<Utc>),
        EpochMillis(i64),
    }

    match Instant::deserialize(deserializer)? {
        Instant::Rfc3339(at) => Ok(at),
        Instant::EpochMillis(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {} out of range", ms))),
    }
}

impl From<&IncidentRecord> for WireIncident {
    fn from(incident: &IncidentRecord) -> Self {
        let victim = &incident.victim;
        Self {
            incident_id: incident.incident_id.clone(),
            timestamp: incident.timestamp,
            location: WireLocation {
                latitude: incident.location.latitude,
                longitude: incident.location.longitude,
            },
            victim: WireVictim {
                age: i64::from(victim.age),
                blood_group: victim.blood_group.into(),
                allergies: victim.allergies.clone(),
                medical_conditions: victim.medical_conditions.clone(),
                medications: victim.medications.clone(),
                emergency_contact: WireContact {
                    name: victim.emergency_contact.name.clone(),
                    phone: victim.emergency_contact.phone.clone(),
                    relationship: victim.emergency_contact.relationship.clone(),
                },
            },
            vehicle_type: incident.vehicle_type.clone(),
            status: incident.status.into(),
            responder_id: incident.responder_id.clone(),
            acknowledged_at: incident.acknowledged_at,
            resolved_at: incident.resolved_at,
            created_at: incident.created_at,
        }
    }
}

impl TryFrom<WireIncident> for IncidentRecord {
    type Error = DecodeError;

    fn try_from(wire: WireIncident) -> Result<Self, Self::Error> {
        check_incident_id(&wire.incident_id)?;
        let location = Location::new(wire.location.latitude, wire.location.longitude);
        check_location(&location).map_err(DecodeError::Invalid)?;
        let age = check_age(wire.victim.age).map_err(DecodeError::Invalid)?;

        Ok(Self {
            incident_id: wire.incident_id,
            timestamp: wire.timestamp,
            location,
            victim: VictimInfo {
                age,
                blood_group: wire.victim.blood_group.into(),
                allergies: wire.victim.allergies,
                medical_conditions: wire.victim.medical_conditions,
                medications: wire.victim.medications,
                emergency_contact: EmergencyContact {
                    name: wire.victim.emergency_contact.name,
                    phone: wire.victim.emergency_contact.phone,
                    relationship: wire.victim.emergency_contact.relationship,
                },
            },
            vehicle_type: wire.vehicle_type,
            status: wire.status.into(),
            responder_id: wire.responder_id,
            acknowledged_at: wire.acknowledged_at,
            resolved_at: wire.resolved_at,
            created_at: wire.created_at,
        })
    }
}

impl From<&StatusEnvelope> for WireStatus {
    fn from(envelope: &StatusEnvelope) -> Self {
        Self {
            incident_id: envelope.incident_id.clone(),
            status: envelope.status.into(),
            responder_id: envelope.responder_id.clone(),
            timestamp: envelope.timestamp,
        }
    }
}

impl From<&ResponseEnvelope> for WireResponse {
    fn from(envelope: &ResponseEnvelope) -> Self {
        Self {
            incident_id: envelope.incident_id.clone(),
            response: envelope.response.clone(),
            responder_id: envelope.responder_id.clone(),
            timestamp: envelope.timestamp,
        }
    }
}
