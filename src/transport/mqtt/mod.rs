//! MQTT transport on `rumqttc`.
//!
//! The initial connect polls the event loop until the broker's CONNACK.
//! After that a background task owns the event loop: it forwards inbound
//! publishes, completes pending subscriptions on SUBACK and, when the link
//! drops, keeps polling with exponential backoff until the broker accepts
//! the client again. A requested disconnect lets the loop run until the
//! DISCONNECT packet is flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeFilter, SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    ConnectOptions, EventStream, QoS, Result, Transport, TransportError, TransportEvent,
    TransportSession, EVENT_CHANNEL_CAPACITY,
};
use crate::utils::retry::{reconnect_delays, MAX_RECONNECT_DELAY};

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 64;

/// How long `disconnect` waits for the DISCONNECT packet to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

type PendingSubscription = Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens sessions against a real MQTT broker.
#[derive(Debug, Clone, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for MqttTransport {
    #[tracing::instrument(name = "mqtt.connect", skip_all, fields(server = %options.server_uri()))]
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn TransportSession>, EventStream)> {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(options.clean_session);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(options.connection_timeout.as_secs().max(1));
        wait_for_connack(&mut eventloop).await?;
        info!(client_id = %options.client_id, "MQTT session established");

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        let pending: PendingSubscription = Arc::new(Mutex::new(None));

        let event_loop = spawn_event_loop(
            eventloop,
            LoopContext {
                connected: Arc::clone(&connected),
                closing: Arc::clone(&closing),
                pending: Arc::clone(&pending),
                events: events_tx,
                auto_reconnect: options.auto_reconnect,
            },
            cancel_rx,
        );

        let session = Arc::new(MqttSession {
            client,
            connected,
            closing,
            pending,
            cancel: cancel_tx,
            event_loop: Mutex::new(Some(event_loop)),
            ack_timeout: options.connection_timeout,
        });
        Ok((session, events_rx))
    }
}

/// Poll until the broker answers the CONNECT.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(TransportError::Connection(format!(
                        "broker refused connection: {:?}",
                        code
                    ))),
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}

struct LoopContext {
    connected: Arc<AtomicBool>,
    /// Set once the owner asked for a graceful disconnect.
    closing: Arc<AtomicBool>,
    pending: PendingSubscription,
    events: mpsc::Sender<TransportEvent>,
    auto_reconnect: bool,
}

impl LoopContext {
    fn complete_subscription(&self, result: Result<()>) {
        if let Some(waiter) = lock(&self.pending).take() {
            let _ = waiter.send(result);
        }
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    ctx: LoopContext,
    mut cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delays = None;

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel_rx.changed() => break,
                polled = eventloop.poll() => polled,
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                },
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    delays = None;
                    if ctx.closing.load(Ordering::SeqCst)
                        || ctx.connected.swap(true, Ordering::SeqCst)
                    {
                        continue;
                    }
                    info!("MQTT session re-established");
                    TransportEvent::Reconnected
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT flushed, stopping MQTT event loop");
                    break;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let rejected = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    ctx.complete_subscription(if rejected {
                        Err(TransportError::Subscribe(
                            "broker rejected one or more filters".to_string(),
                        ))
                    } else {
                        Ok(())
                    });
                    continue;
                }
                Ok(other) => {
                    debug!(event = ?other, "MQTT event");
                    continue;
                }
                Err(e) if ctx.closing.load(Ordering::SeqCst) => {
                    debug!(error = %e, "MQTT connection closed during disconnect");
                    break;
                }
                Err(e) => {
                    let first_failure = ctx.connected.swap(false, Ordering::SeqCst);
                    ctx.complete_subscription(Err(TransportError::Subscribe(e.to_string())));

                    if first_failure {
                        warn!(error = %e, "MQTT connection lost");
                        if ctx
                            .events
                            .send(TransportEvent::ConnectionLost(e.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    if !ctx.auto_reconnect {
                        break;
                    }

                    let delay = delays
                        .get_or_insert_with(reconnect_delays)
                        .next()
                        .unwrap_or(MAX_RECONNECT_DELAY);
                    debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    tokio::select! {
                        _ = cancel_rx.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if ctx.events.send(event).await.is_err() {
                debug!("Session event receiver dropped, stopping MQTT event loop");
                break;
            }
        }

        ctx.connected.store(false, Ordering::SeqCst);
        debug!("MQTT event loop stopped");
    })
}

/// Live session on an MQTT broker.
struct MqttSession {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    pending: PendingSubscription,
    cancel: watch::Sender<bool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    ack_timeout: Duration,
}

#[async_trait]
impl TransportSession for MqttSession {
    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        *lock(&self.pending) = Some(ack_tx);

        let requests = filters
            .iter()
            .map(|(filter, qos)| SubscribeFilter::new(filter.clone(), (*qos).into()));
        self.client
            .subscribe_many(requests)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Subscribe(
                "event loop stopped before SUBACK".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout(self.ack_timeout)),
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        self.client
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let event_loop = lock(&self.event_loop).take();
        let Some(mut event_loop) = event_loop.filter(|task| !task.is_finished()) else {
            self.connected.store(false, Ordering::SeqCst);
            return Ok(());
        };

        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            // the request queue only closes once the event loop is gone
            debug!(error = %e, "MQTT event loop already stopped");
            return Ok(());
        }

        if tokio::time::timeout(DISCONNECT_GRACE, &mut event_loop)
            .await
            .is_err()
        {
            warn!("DISCONNECT not flushed in time, dropping the connection");
            let _ = self.cancel.send(true);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
