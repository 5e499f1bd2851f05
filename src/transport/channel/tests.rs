use super::*;
use std::time::Duration;
use tokio::time::timeout;

fn options(client_id: &str) -> ConnectOptions {
    ConnectOptions::new("localhost", 1883, client_id)
}

fn filters(patterns: &[&str]) -> Vec<(String, QoS)> {
    patterns
        .iter()
        .map(|p| (p.to_string(), QoS::AtLeastOnce))
        .collect()
}

async fn next_event(events: &mut EventStream) -> Option<TransportEvent> {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .ok()
        .flatten()
}

async fn assert_no_event(events: &mut EventStream) {
    let result = timeout(Duration::from_millis(50), events.recv()).await;
    assert!(result.is_err(), "unexpected event: {:?}", result);
}

#[tokio::test]
async fn test_subscriber_receives_matching_publish() {
    let broker = ChannelTransport::new();
    let (publisher, _publisher_events) = broker.connect(&options("pub")).await.unwrap();
    let (subscriber, mut events) = broker.connect(&options("sub")).await.unwrap();
    subscriber
        .subscribe(&filters(&["crash/alerts/+"]))
        .await
        .unwrap();

    publisher
        .publish("crash/alerts/region", Bytes::from_static(b"{}"), QoS::AtLeastOnce, false)
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Message {
            topic: "crash/alerts/region".to_string(),
            payload: Bytes::from_static(b"{}"),
        })
    );
}

#[tokio::test]
async fn test_unsubscribed_topic_not_delivered() {
    let broker = ChannelTransport::new();
    let (session, mut events) = broker.connect(&options("sub")).await.unwrap();
    session
        .subscribe(&filters(&["crash/status/+"]))
        .await
        .unwrap();

    session
        .publish("crash/alerts/region", Bytes::from_static(b"x"), QoS::AtLeastOnce, false)
        .await
        .unwrap();

    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn test_session_receives_own_publish_when_subscribed() {
    let broker = ChannelTransport::new();
    let (session, mut events) = broker.connect(&options("self")).await.unwrap();
    session.subscribe(&filters(&["crash/#"])).await.unwrap();

    session
        .publish("crash/status/abc", Bytes::from_static(b"s"), QoS::AtLeastOnce, false)
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        Some(TransportEvent::Message { topic, .. }) if topic == "crash/status/abc"
    ));
}

#[tokio::test]
async fn test_unavailable_broker_refuses_connect() {
    let broker = ChannelTransport::new();
    broker.set_available(false);

    let result = broker.connect(&options("sub")).await;

    assert!(matches!(result, Err(TransportError::Connection(msg)) if msg.contains("tcp://localhost:1883")));
}

#[tokio::test]
async fn test_drop_and_restore_connections() {
    let broker = ChannelTransport::new();
    let (session, mut events) = broker.connect(&options("sub")).await.unwrap();
    session.subscribe(&filters(&["crash/alerts/+"])).await.unwrap();

    broker.drop_connections();
    assert!(matches!(
        next_event(&mut events).await,
        Some(TransportEvent::ConnectionLost(_))
    ));
    assert!(!session.is_connected());
    assert!(matches!(
        session
            .publish("crash/alerts/region", Bytes::new(), QoS::AtLeastOnce, false)
            .await,
        Err(TransportError::NotConnected)
    ));

    broker.restore_connections();
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Reconnected));
    assert!(session.is_connected());

    // clean session: subscriptions did not survive the drop
    session
        .publish("crash/alerts/region", Bytes::new(), QoS::AtLeastOnce, false)
        .await
        .unwrap();
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn test_disconnect_closes_event_stream() {
    let broker = ChannelTransport::new();
    let (session, mut events) = broker.connect(&options("sub")).await.unwrap();

    session.disconnect().await.unwrap();

    assert!(!session.is_connected());
    assert_eq!(next_event(&mut events).await, None);
    assert!(matches!(
        session.subscribe(&filters(&["crash/#"])).await,
        Err(TransportError::NotConnected)
    ));
}
