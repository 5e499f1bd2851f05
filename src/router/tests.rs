use super::*;
use crate::codec;
use crate::model::IncidentStatus;
use crate::test_utils::{make_incident, FailingHandler, RecordingHandler};
use std::sync::atomic::Ordering;

fn status_payload(incident_id: &str) -> Vec<u8> {
    let envelope = StatusEnvelope::now(incident_id, IncidentStatus::Acknowledged, Some("r1".into()));
    codec::encode_status(&envelope).unwrap()
}

async fn router_with_recorder() -> (TopicRouter, Arc<RwLock<Vec<InboundMessage>>>) {
    let router = TopicRouter::new();
    let handler = RecordingHandler::new();
    let received = handler.received();
    router.register(Box::new(handler)).await;
    (router, received)
}

#[test]
fn test_route_for_topic() {
    assert_eq!(Route::for_topic("crash/alerts/region"), Some(Route::Alert));
    assert_eq!(Route::for_topic("crash/status/abc"), Some(Route::Status));
    assert_eq!(Route::for_topic("crash/responses/abc"), Some(Route::Response));
    assert_eq!(Route::for_topic("crash/unknown/x"), None);
    assert_eq!(Route::for_topic("crash/alerts"), None);
    assert_eq!(Route::for_topic(""), None);
}

#[test]
fn test_topic_builders() {
    assert_eq!(status_topic("abc123"), "crash/status/abc123");
    assert_eq!(response_topic("abc123"), "crash/responses/abc123");
    assert!(ALERT_TOPIC.starts_with(ALERT_PREFIX));
}

#[test]
fn test_topic_matches_single_level() {
    assert!(topic_matches("crash/alerts/+", "crash/alerts/region"));
    assert!(topic_matches("crash/status/+", "crash/status/abc123"));
    assert!(!topic_matches("crash/alerts/+", "crash/alerts/region/north"));
    assert!(!topic_matches("crash/alerts/+", "crash/alerts"));
    assert!(!topic_matches("crash/alerts/+", "crash/status/abc"));
}

#[test]
fn test_topic_matches_multi_level() {
    assert!(topic_matches("crash/#", "crash/alerts/region"));
    assert!(topic_matches("crash/#", "crash"));
    assert!(topic_matches("#", "crash/status/x"));
    assert!(!topic_matches("#", "$SYS/broker/load"));
    assert!(!topic_matches("crash/#/x", "crash/a/x"));
}

#[test]
fn test_topic_matches_exact() {
    assert!(topic_matches("crash/alerts/region", "crash/alerts/region"));
    assert!(!topic_matches("crash/alerts/region", "crash/alerts/regions"));
}

#[test]
fn test_subscription_filters() {
    let router = TopicRouter::new();
    assert_eq!(
        router.subscription_filters(),
        vec!["crash/alerts/+", "crash/status/+", "crash/responses/+"]
    );
}

#[tokio::test]
async fn test_dispatch_alert_to_alert_path() {
    let (router, received) = router_with_recorder().await;
    let incident = make_incident("abc123");
    let payload = codec::encode_incident(&incident).unwrap();

    let result = router.dispatch("crash/alerts/region", &payload).await;

    assert_eq!(result, DispatchResult::Dispatched(Route::Alert));
    let received = received.read().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], InboundMessage::Alert(incident));
}

#[tokio::test]
async fn test_dispatch_status_to_status_path() {
    let (router, received) = router_with_recorder().await;

    let result = router.dispatch("crash/status/abc", &status_payload("abc")).await;

    assert_eq!(result, DispatchResult::Dispatched(Route::Status));
    let received = received.read().await;
    assert!(matches!(&received[0], InboundMessage::Status(s) if s.incident_id == "abc"));
}

#[tokio::test]
async fn test_dispatch_response_to_response_path() {
    let (router, received) = router_with_recorder().await;
    let envelope = ResponseEnvelope::now("abc", "en route", None);
    let payload = codec::encode_response(&envelope).unwrap();

    let result = router.dispatch("crash/responses/abc", &payload).await;

    assert_eq!(result, DispatchResult::Dispatched(Route::Response));
    assert_eq!(received.read().await[0].route(), Route::Response);
}

#[tokio::test]
async fn test_dispatch_unknown_topic_invokes_nothing() {
    let (router, received) = router_with_recorder().await;

    let result = router.dispatch("crash/unknown/x", &status_payload("abc")).await;

    assert_eq!(result, DispatchResult::Unrouted);
    assert!(received.read().await.is_empty());
}

#[tokio::test]
async fn test_decode_failure_does_not_stop_router() {
    let (router, received) = router_with_recorder().await;

    let bad = router.dispatch("crash/status/abc", b"{not json").await;
    let good = router.dispatch("crash/status/abc", &status_payload("abc")).await;

    assert_eq!(bad, DispatchResult::DecodeError(Route::Status));
    assert!(!bad.is_success());
    assert_eq!(good, DispatchResult::Dispatched(Route::Status));
    assert_eq!(received.read().await.len(), 1);
}

#[tokio::test]
async fn test_handler_failure_still_reaches_other_handlers() {
    let router = TopicRouter::new();
    let failing = FailingHandler::new();
    let calls = failing.calls();
    let recorder = RecordingHandler::new();
    let received = recorder.received();
    router.register(Box::new(failing)).await;
    router.register(Box::new(recorder)).await;

    let result = router.dispatch("crash/status/abc", &status_payload("abc")).await;

    assert_eq!(result, DispatchResult::HandlerFailed(Route::Status));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(received.read().await.len(), 1);
}

#[tokio::test]
async fn test_dispatch_without_handlers_succeeds() {
    let router = TopicRouter::new();
    let result = router.dispatch("crash/status/abc", &status_payload("abc")).await;
    assert_eq!(result, DispatchResult::Dispatched(Route::Status));
}
