//! Mock transport implementation for testing.
//!
//! Connect attempts follow a script of delays and outcomes. Sessions record
//! what they publish and subscribe to, and tests inject inbound events into
//! the most recent session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use super::{
    ConnectOptions, EventStream, QoS, Result, Transport, TransportError, TransportEvent,
    TransportSession, EVENT_CHANNEL_CAPACITY,
};

/// A publish recorded by a mock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Scripted behavior for one connect attempt.
#[derive(Debug, Clone, Default)]
struct ConnectStep {
    delay: Duration,
    failure: Option<String>,
}

#[derive(Default)]
struct MockState {
    connect_script: RwLock<VecDeque<ConnectStep>>,
    connect_calls: AtomicUsize,
    last_options: RwLock<Option<ConnectOptions>>,
    fail_on_subscribe: RwLock<bool>,
    subscribe_delay: RwLock<Duration>,
    fail_on_publish: RwLock<bool>,
    fail_on_disconnect: RwLock<bool>,
    published: RwLock<Vec<PublishedMessage>>,
    subscriptions: RwLock<Vec<(String, QoS)>>,
    disconnects: AtomicUsize,
    latest: RwLock<Option<(Arc<MockSession>, mpsc::Sender<TransportEvent>)>>,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the session
/// manager owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connect attempt that succeeds after `delay`.
    pub async fn script_connect_success(&self, delay: Duration) {
        self.state.connect_script.write().await.push_back(ConnectStep {
            delay,
            failure: None,
        });
    }

    /// Queue a connect attempt that fails after `delay`.
    pub async fn script_connect_failure(&self, delay: Duration, reason: &str) {
        self.state.connect_script.write().await.push_back(ConnectStep {
            delay,
            failure: Some(reason.to_string()),
        });
    }

    pub async fn set_fail_on_subscribe(&self, fail: bool) {
        *self.state.fail_on_subscribe.write().await = fail;
    }

    /// Delay every subscribe, as a broker slow to send SUBACK would.
    pub async fn set_subscribe_delay(&self, delay: Duration) {
        *self.state.subscribe_delay.write().await = delay;
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.state.fail_on_publish.write().await = fail;
    }

    pub async fn set_fail_on_disconnect(&self, fail: bool) {
        *self.state.fail_on_disconnect.write().await = fail;
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent connect attempt.
    pub async fn last_options(&self) -> Option<ConnectOptions> {
        self.state.last_options.read().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.read().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state.subscriptions.read().await.clone()
    }

    /// Push an event into the most recent session's stream.
    ///
    /// Returns false if there is no session or its stream is closed.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = match self.state.latest.read().await.as_ref() {
            Some((_, sender)) => sender.clone(),
            None => return false,
        };
        sender.send(event).await.is_ok()
    }

    /// Deliver an inbound publish to the most recent session.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
        .await
    }

    /// Drop the link of the most recent session.
    pub async fn lose_connection(&self, reason: &str) -> bool {
        if let Some((session, _)) = self.state.latest.read().await.as_ref() {
            session.connected.store(false, Ordering::SeqCst);
        }
        self.emit(TransportEvent::ConnectionLost(reason.to_string()))
            .await
    }

    /// Bring the link of the most recent session back.
    pub async fn restore_connection(&self) -> bool {
        if let Some((session, _)) = self.state.latest.read().await.as_ref() {
            session.connected.store(true, Ordering::SeqCst);
        }
        self.emit(TransportEvent::Reconnected).await
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn TransportSession>, EventStream)> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_options.write().await = Some(options.clone());

        let step = self
            .state
            .connect_script
            .write()
            .await
            .pop_front()
            .unwrap_or_default();

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        if let Some(reason) = step.failure {
            return Err(TransportError::Connection(reason));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = Arc::new(MockSession {
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(true),
        });
        *self.state.latest.write().await = Some((Arc::clone(&session), events_tx));

        Ok((session, events_rx))
    }
}

/// Session opened by `MockTransport`.
struct MockSession {
    state: Arc<MockState>,
    connected: AtomicBool,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<()> {
        let delay = *self.state.subscribe_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.state.fail_on_subscribe.read().await {
            return Err(TransportError::Subscribe("Mock subscribe failure".to_string()));
        }
        self.state
            .subscriptions
            .write()
            .await
            .extend(filters.iter().cloned());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        if *self.state.fail_on_publish.read().await {
            return Err(TransportError::Publish("Mock publish failure".to_string()));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.state.published.write().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if *self.state.fail_on_disconnect.read().await {
            return Err(TransportError::Disconnect("Mock disconnect failure".to_string()));
        }
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
