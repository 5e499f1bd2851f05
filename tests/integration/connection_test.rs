//! Connection lifecycle against the channel broker.

#[path = "../common/mod.rs"]
mod common;

use common::{Participant, HOST, PORT};
use crashwatch::simulator::IncidentSimulator;
use crashwatch::transport::ChannelTransport;
use crashwatch::{ConnectOutcome, ConnectionState, IncidentStatus};

/// Tests that an unreachable broker leaves the manager in `Failed`.
#[tokio::test]
async fn test_unavailable_broker_fails() {
    let broker = ChannelTransport::new();
    broker.set_available(false);
    let participant = Participant::new(&broker, None).await;

    let outcome = participant
        .manager
        .connect(HOST, PORT, None)
        .unwrap()
        .await;

    assert!(matches!(outcome, ConnectOutcome::Failed(_)));
    assert_eq!(participant.manager.state(), ConnectionState::Failed);
}

/// Tests that a participant can connect once the broker comes back.
#[tokio::test]
async fn test_connect_after_failure() {
    let broker = ChannelTransport::new();
    broker.set_available(false);
    let participant = Participant::new(&broker, None).await;
    let first = participant
        .manager
        .connect(HOST, PORT, None)
        .unwrap()
        .await;
    assert!(!first.is_connected());

    broker.set_available(true);
    let second = participant
        .manager
        .connect(HOST, PORT, None)
        .unwrap()
        .await;

    assert!(matches!(second, ConnectOutcome::Connected { subscribed: true }));
    assert_eq!(participant.manager.state(), ConnectionState::Connected);
}

/// Tests that subscriptions are restored after the broker drops and
/// restores every connection.
#[tokio::test]
async fn test_delivery_resumes_after_reconnect() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", Some("r1")).await;

    broker.drop_connections();
    responder.wait_for_state(ConnectionState::Disconnected).await;
    publisher.wait_for_state(ConnectionState::Disconnected).await;

    broker.restore_connections();
    responder.wait_for_state(ConnectionState::Connected).await;
    publisher.wait_for_state(ConnectionState::Connected).await;

    let incident = IncidentSimulator::seeded(21).generate();
    let id = incident.incident_id.clone();
    // resubscription happens right after the state flips back
    let deadline = tokio::time::Instant::now() + common::WAIT;
    loop {
        publisher.manager.publish_emergency_alert(&incident).await;
        if responder.store.len().await > 0 || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    responder.wait_for_status(&id, IncidentStatus::Active).await;
}

/// Tests that nothing is delivered after an explicit disconnect.
#[tokio::test]
async fn test_disconnect_stops_delivery() {
    let broker = ChannelTransport::new();
    let publisher = Participant::connect(&broker, "publisher", None).await;
    let responder = Participant::connect(&broker, "responder", None).await;

    responder.manager.disconnect().await;
    assert_eq!(responder.manager.state(), ConnectionState::Disconnected);

    let incident = IncidentSimulator::seeded(5).generate();
    publisher.manager.publish_emergency_alert(&incident).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(responder.store.is_empty().await);
}
