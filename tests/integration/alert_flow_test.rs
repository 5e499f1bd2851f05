//! Alert, acknowledgement and resolution between two participants.

#[path = "../common/mod.rs"]
mod common;

use std::time::Duration;

use common::Participant;
use crashwatch::simulator::IncidentSimulator;
use crashwatch::store::IncidentStore;
use crashwatch::transport::ChannelTransport;
use crashwatch::IncidentStatus;

/// Tests that an alert reaches the responder and the acknowledgement
/// flows back to the publisher.
#[tokio::test]
async fn test_alert_acknowledged_by_responder() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r1")).await;

    let incident = IncidentSimulator::seeded(7).generate();
    let id = incident.incident_id.clone();
    publisher.store.insert(incident.clone()).await.unwrap();
    publisher.manager.publish_emergency_alert(&incident).await;

    let received = responder.wait_for_status(&id, IncidentStatus::Active).await;
    assert_eq!(received.victim, incident.victim);
    assert_eq!(received.vehicle_type, incident.vehicle_type);

    responder
        .manager
        .publish_status_update(&id, IncidentStatus::Acknowledged, responder.manager.responder_id())
        .await;

    let acknowledged = publisher
        .wait_for_status(&id, IncidentStatus::Acknowledged)
        .await;
    assert_eq!(acknowledged.responder_id.as_deref(), Some("r1"));
    assert!(acknowledged.acknowledged_at.is_some());

    // the responder hears its own status update too
    responder
        .wait_for_status(&id, IncidentStatus::Acknowledged)
        .await;
}

/// Tests the full lifecycle through to resolution.
#[tokio::test]
async fn test_incident_resolved() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r2")).await;

    let incident = IncidentSimulator::seeded(11).generate();
    let id = incident.incident_id.clone();
    publisher.manager.publish_emergency_alert(&incident).await;
    responder.wait_for_status(&id, IncidentStatus::Active).await;

    responder
        .manager
        .publish_status_update(&id, IncidentStatus::Acknowledged, Some("r2"))
        .await;
    publisher
        .wait_for_status(&id, IncidentStatus::Acknowledged)
        .await;
    responder
        .manager
        .publish_status_update(&id, IncidentStatus::Resolved, Some("r2"))
        .await;

    let resolved = publisher.wait_for_status(&id, IncidentStatus::Resolved).await;
    assert!(resolved.resolved_at.is_some());
    assert_eq!(
        publisher
            .store
            .count_by_status(IncidentStatus::Resolved)
            .await
            .unwrap(),
        1
    );
}

/// Tests that a replayed alert does not undo an acknowledgement.
#[tokio::test]
async fn test_replayed_alert_keeps_acknowledgement() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r3")).await;

    let incident = IncidentSimulator::seeded(3).generate();
    let id = incident.incident_id.clone();
    publisher.manager.publish_emergency_alert(&incident).await;
    responder.wait_for_status(&id, IncidentStatus::Active).await;
    responder
        .manager
        .publish_status_update(&id, IncidentStatus::Acknowledged, Some("r3"))
        .await;
    responder
        .wait_for_status(&id, IncidentStatus::Acknowledged)
        .await;

    publisher.manager.publish_emergency_alert(&incident).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = responder.store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, IncidentStatus::Acknowledged);
    assert_eq!(record.responder_id.as_deref(), Some("r3"));
}

/// Tests that free-form responses carry the responder id.
#[tokio::test]
async fn test_response_reaches_publisher() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r4")).await;

    responder
        .manager
        .publish_response("abc123", "Ambulance dispatched")
        .await;

    let deadline = tokio::time::Instant::now() + common::WAIT;
    let responses = loop {
        let responses = publisher.responses.responses().await;
        if !responses.is_empty() || tokio::time::Instant::now() >= deadline {
            break responses;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].incident_id, "abc123");
    assert_eq!(responses[0].response, "Ambulance dispatched");
    assert_eq!(responses[0].responder_id.as_deref(), Some("r4"));
}

/// Tests that a status update for an incident nobody stored is harmless.
#[tokio::test]
async fn test_status_for_unknown_incident_ignored() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r5")).await;

    responder
        .manager
        .publish_status_update("ghost", IncidentStatus::Acknowledged, Some("r5"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(publisher.store.get("ghost").await.unwrap().is_none());
    assert!(publisher.manager.is_connected());
}
