//! Broker transport abstraction.
//!
//! A `Transport` opens broker sessions. Each session hands back a channel of
//! `TransportEvent`s that carries inbound deliveries and link changes in
//! arrival order. The session manager owns exactly one such channel at a time.
//!
//! Implementations:
//! - `MqttTransport`: real broker connection over `rumqttc` (feature `mqtt`)
//! - `ChannelTransport`: in-process broker on tokio broadcast channels
//! - `MockTransport`: scriptable transport for tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub mod channel;
pub mod mock;
#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use channel::ChannelTransport;
pub use mock::{MockTransport, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;

/// Broker waits this long for the initial connection before giving up.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between keep-alive pings.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the per-session event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Receiving half of a session's event channel.
pub type EventStream = mpsc::Receiver<TransportEvent>;

/// Errors raised by a transport or one of its sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    #[error("Session is not connected")]
    NotConnected,
}

/// Delivery assurance level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Parameters for opening a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Drop subscriptions and queued state when the session ends.
    pub clean_session: bool,
    /// Re-establish the link after it is lost.
    pub auto_reconnect: bool,
    pub connection_timeout: Duration,
    pub keep_alive: Duration,
}

impl ConnectOptions {
    /// Options with clean session, auto-reconnect and the default timeouts.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            clean_session: true,
            auto_reconnect: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Identity of the broker endpoint, e.g. `tcp://10.0.0.5:1883`.
    pub fn server_uri(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Something a session observed on its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound publish on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The link dropped. Carries the reason reported by the transport.
    ConnectionLost(String),
    /// The link came back after a loss. Subscriptions of a clean session are gone.
    Reconnected,
}

/// Opens broker sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a session.
    ///
    /// Resolves once the broker accepted the connection. The returned stream
    /// closes when the session ends.
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn TransportSession>, EventStream)>;
}

/// One live broker session.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Subscribe to all filters in one request.
    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<()>;

    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()>;

    /// Close the session gracefully.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;
}
