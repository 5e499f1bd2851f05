//! Shared utilities for integration tests.
//!
//! A `Participant` is one application instance: a session manager with its
//! own incident store and tracker, connected to a shared channel broker.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crashwatch::handlers::IncidentTracker;
use crashwatch::model::ResponseEnvelope;
use crashwatch::router::{HandlerError, InboundMessage, MessageHandler, TopicRouter};
use crashwatch::store::{IncidentStore, MemoryIncidentStore};
use crashwatch::transport::ChannelTransport;
use crashwatch::{ConnectionState, IncidentRecord, IncidentStatus, SessionManager};

pub const HOST: &str = "127.0.0.1";
pub const PORT: u16 = 1883;

/// How long a poll helper waits before giving up.
pub const WAIT: Duration = Duration::from_secs(2);

/// Collects every response envelope a participant receives.
#[derive(Clone, Default)]
pub struct ResponseCollector {
    responses: Arc<RwLock<Vec<ResponseEnvelope>>>,
}

impl ResponseCollector {
    pub async fn responses(&self) -> Vec<ResponseEnvelope> {
        self.responses.read().await.clone()
    }
}

impl MessageHandler for ResponseCollector {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let responses = Arc::clone(&self.responses);
        Box::pin(async move {
            if let InboundMessage::Response(envelope) = &*message {
                responses.write().await.push(envelope.clone());
            }
            Ok(())
        })
    }
}

pub struct Participant {
    pub manager: SessionManager,
    pub store: Arc<MemoryIncidentStore>,
    pub responses: ResponseCollector,
}

impl Participant {
    /// Build a participant and connect it to `broker`.
    pub async fn connect(
        broker: &ChannelTransport,
        client_id: &str,
        responder_id: Option<&str>,
    ) -> Self {
        let participant = Self::new(broker, responder_id).await;
        let outcome = participant
            .manager
            .connect(HOST, PORT, Some(client_id.to_string()))
            .expect("valid endpoint")
            .await;
        assert!(outcome.is_connected(), "connect failed: {:?}", outcome);
        participant
    }

    /// Build a participant without connecting.
    pub async fn new(broker: &ChannelTransport, responder_id: Option<&str>) -> Self {
        let store = Arc::new(MemoryIncidentStore::new());
        let responses = ResponseCollector::default();

        let router = TopicRouter::new();
        router
            .register(Box::new(IncidentTracker::new(store.clone())))
            .await;
        router.register(Box::new(responses.clone())).await;

        let mut manager = SessionManager::new(Arc::new(broker.clone()), router);
        if let Some(responder_id) = responder_id {
            manager = manager.with_responder_id(responder_id);
        }

        Self {
            manager,
            store,
            responses,
        }
    }

    /// Poll the local store until `incident_id` reaches `status`.
    pub async fn wait_for_status(&self, incident_id: &str, status: IncidentStatus) -> IncidentRecord {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(record) = self.store.get(incident_id).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("incident {} never reached {:?}", incident_id, status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.manager.watch_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for connection state")
            .expect("state channel closed");
    }
}
