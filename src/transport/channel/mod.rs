//! In-memory channel-based broker for standalone mode.
//!
//! Uses a tokio broadcast channel as a shared broker within a single process.
//! Every session sees every frame and filters by its own subscriptions, so
//! sessions behave like independent MQTT clients of one broker. Ideal for
//! local runs and tests without an external broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    ConnectOptions, EventStream, QoS, Result, Transport, TransportError, TransportEvent,
    TransportSession, EVENT_CHANNEL_CAPACITY,
};
use crate::router::topic_matches;

/// Channel capacity for broadcast.
const BROKER_CAPACITY: usize = 1024;

/// Frame carried on the shared broker channel.
#[derive(Debug, Clone)]
enum BrokerFrame {
    Publish { topic: String, payload: Bytes },
    DropConnections,
    RestoreConnections,
}

/// In-process broker shared by every session it opens.
///
/// Clones share the same broker.
#[derive(Clone)]
pub struct ChannelTransport {
    sender: broadcast::Sender<BrokerFrame>,
    available: Arc<AtomicBool>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROKER_CAPACITY);
        info!("Channel broker initialized");
        Self {
            sender,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Accept or refuse new connections.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Cut the link of every open session.
    ///
    /// Sessions report `ConnectionLost` and forget their subscriptions.
    pub fn drop_connections(&self) {
        warn!("Dropping all channel broker connections");
        let _ = self.sender.send(BrokerFrame::DropConnections);
    }

    /// Bring back the link of every session that lost it.
    ///
    /// Sessions opened with auto-reconnect report `Reconnected`.
    pub fn restore_connections(&self) {
        info!("Restoring channel broker connections");
        let _ = self.sender.send(BrokerFrame::RestoreConnections);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn TransportSession>, EventStream)> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!(
                "broker {} unavailable",
                options.server_uri()
            )));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let session = Arc::new(ChannelSession {
            sender: self.sender.clone(),
            filters: Arc::new(RwLock::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
            cancel: cancel_tx,
        });

        spawn_forwarder(
            self.sender.subscribe(),
            Arc::clone(&session.filters),
            Arc::clone(&session.connected),
            options.auto_reconnect,
            events_tx,
            cancel_rx,
        );

        info!(client_id = %options.client_id, "Channel session connected");
        Ok((session, events_rx))
    }
}

/// Session on the in-process broker.
struct ChannelSession {
    sender: broadcast::Sender<BrokerFrame>,
    filters: Arc<RwLock<Vec<String>>>,
    connected: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl TransportSession for ChannelSession {
    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut current = self.filters.write().await;
        for (filter, _qos) in filters {
            if !current.contains(filter) {
                current.push(filter.clone());
            }
        }
        debug!(filters = ?current, "Channel session subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes, _qos: QoS, _retain: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = BrokerFrame::Publish {
            topic: topic.to_string(),
            payload,
        };
        match self.sender.send(frame) {
            Ok(receivers) => debug!(topic = %topic, receivers, "Published to channel broker"),
            Err(_) => debug!(topic = %topic, "Published to channel broker (no receivers)"),
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.cancel.send(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Forward broker frames that match the session's filters to its event channel.
fn spawn_forwarder(
    mut receiver: broadcast::Receiver<BrokerFrame>,
    filters: Arc<RwLock<Vec<String>>>,
    connected: Arc<AtomicBool>,
    auto_reconnect: bool,
    events: mpsc::Sender<TransportEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel_rx.changed() => break,
                frame = receiver.recv() => frame,
            };

            let event = match frame {
                Ok(BrokerFrame::Publish { topic, payload }) => {
                    if !connected.load(Ordering::SeqCst) {
                        continue;
                    }
                    let subscribed = filters
                        .read()
                        .await
                        .iter()
                        .any(|filter| topic_matches(filter, &topic));
                    if !subscribed {
                        continue;
                    }
                    TransportEvent::Message { topic, payload }
                }
                Ok(BrokerFrame::DropConnections) => {
                    if !connected.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    filters.write().await.clear();
                    TransportEvent::ConnectionLost("channel broker dropped the connection".into())
                }
                Ok(BrokerFrame::RestoreConnections) => {
                    if !auto_reconnect || connected.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    TransportEvent::Reconnected
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!(skipped = n, "Channel session lagged, skipped frames");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Channel broker closed, stopping session");
                    break;
                }
            };

            let link_lost = matches!(event, TransportEvent::ConnectionLost(_));
            if events.send(event).await.is_err() {
                debug!("Session event receiver dropped, stopping forwarder");
                break;
            }
            if link_lost && !auto_reconnect {
                break;
            }
        }
        connected.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests;
