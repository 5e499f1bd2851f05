//! Broker session lifecycle.
//!
//! `SessionManager` owns at most one transport session. Every `connect` and
//! `disconnect` bumps a generation token; asynchronous outcomes and inbound
//! events carry the generation they were started under and are ignored once
//! it is no longer current. State transitions and session replacement happen
//! under one mutex that is never held across an await.
//!
//! Transport failures never escape this module. They are logged and show up
//! as `ConnectionState` changes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::{validate_endpoint, ConfigError};
use crate::model::{
    ConnectionState, IncidentRecord, IncidentStatus, ResponseEnvelope, StatusEnvelope,
};
use crate::router::{response_topic, status_topic, MessageHandler, TopicRouter, ALERT_TOPIC};
use crate::transport::{
    ConnectOptions, EventStream, QoS, Transport, TransportError, TransportEvent, TransportSession,
};

/// Errors returned by `SessionManager` operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid broker configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Final outcome of one connect attempt.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The session is up. `subscribed` is false when the subscription step
    /// failed and the session runs without inbound routing.
    Connected { subscribed: bool },
    /// The attempt failed and the state moved to `Failed`.
    Failed(TransportError),
    /// A later `connect` or `disconnect` replaced this attempt.
    Superseded,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Handle to an in-flight connect attempt.
///
/// Awaiting it yields the attempt's outcome. Dropping it does not cancel
/// the attempt.
pub struct ConnectAttempt {
    generation: u64,
    outcome: oneshot::Receiver<ConnectOutcome>,
}

impl ConnectAttempt {
    /// Generation token assigned to this attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Future for ConnectAttempt {
    type Output = ConnectOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(ConnectOutcome::Superseded))
    }
}

/// Client identifier unique to this process and moment.
pub fn default_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "crashwatch-{}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

#[derive(Default)]
struct SessionSlot {
    generation: u64,
    session: Option<Arc<dyn TransportSession>>,
    pump: Option<JoinHandle<()>>,
}

impl SessionSlot {
    /// Start a new generation and detach the current session, if any.
    fn advance(&mut self) -> (u64, Option<Arc<dyn TransportSession>>) {
        self.generation += 1;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        (self.generation, self.session.take())
    }
}

struct SharedState {
    slot: Mutex<SessionSlot>,
    state: watch::Sender<ConnectionState>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Set `state` if `generation` is still current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Set `next` if `generation` is current and the state is `expected`.
    fn transition_from(
        &self,
        generation: u64,
        expected: ConnectionState,
        next: ConnectionState,
    ) -> bool {
        let slot = self.lock();
        let current = *self.state.borrow();
        if slot.generation != generation || current != expected {
            return false;
        }
        self.set_state(next);
        true
    }
}

/// Everything a background task of one session needs.
#[derive(Clone)]
struct SessionContext {
    transport: Arc<dyn Transport>,
    router: TopicRouter,
    shared: Arc<SharedState>,
}

/// Owns the broker session and exposes typed publish operations.
pub struct SessionManager {
    ctx: SessionContext,
    responder_id: Option<String>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, router: TopicRouter) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            ctx: SessionContext {
                transport,
                router,
                shared: Arc::new(SharedState {
                    slot: Mutex::new(SessionSlot::default()),
                    state,
                }),
            },
            responder_id: None,
        }
    }

    /// Attach a responder identity to outgoing responses.
    pub fn with_responder_id(mut self, responder_id: impl Into<String>) -> Self {
        self.responder_id = Some(responder_id.into());
        self
    }

    pub fn responder_id(&self) -> Option<&str> {
        self.responder_id.as_deref()
    }

    /// Router that receives inbound deliveries.
    pub fn router(&self) -> &TopicRouter {
        &self.ctx.router
    }

    /// Register a consumer of decoded inbound messages.
    pub async fn register_handler(&self, handler: Box<dyn MessageHandler>) {
        self.ctx.router.register(handler).await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.ctx.shared.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.shared.state.subscribe()
    }

    /// Whether a session exists and reports itself connected.
    pub fn is_connected(&self) -> bool {
        self.ctx
            .shared
            .lock()
            .session
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    /// Start connecting to `host:port`, replacing any existing session.
    ///
    /// Invalid endpoints are rejected before any state change. Otherwise the
    /// state becomes `Connecting` immediately and the returned handle resolves
    /// once the attempt settles. Must be called within a Tokio runtime.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: Option<String>,
    ) -> Result<ConnectAttempt, SessionError> {
        validate_endpoint(host, port)?;
        let options = ConnectOptions::new(
            host,
            port,
            client_id.unwrap_or_else(default_client_id),
        );

        let (generation, previous) = {
            let mut slot = self.ctx.shared.lock();
            let advanced = slot.advance();
            self.ctx.shared.set_state(ConnectionState::Connecting);
            advanced
        };

        info!(
            generation,
            server = %options.server_uri(),
            client_id = %options.client_id,
            "Connecting to broker"
        );

        if let Some(previous) = previous {
            tokio::spawn(close_session(previous, generation));
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(run_connect(self.ctx.clone(), generation, options, outcome_tx));

        Ok(ConnectAttempt {
            generation,
            outcome: outcome_rx,
        })
    }

    /// Close the session, best-effort.
    ///
    /// On success the state becomes `Disconnected`. If the transport refuses,
    /// the failure is logged and the session and state are left as they were.
    /// An outstanding connect attempt is superseded either way.
    pub async fn disconnect(&self) {
        let (generation, session) = {
            let mut slot = self.ctx.shared.lock();
            match slot.session.clone() {
                Some(session) => (slot.generation, session),
                None => {
                    slot.advance();
                    self.ctx.shared.set_state(ConnectionState::Disconnected);
                    debug!("Disconnect without session");
                    return;
                }
            }
        };

        if let Err(e) = session.disconnect().await {
            warn!(generation, error = %e, "Disconnect failed, keeping session");
            return;
        }

        let mut slot = self.ctx.shared.lock();
        if slot.generation == generation {
            slot.advance();
            self.ctx.shared.set_state(ConnectionState::Disconnected);
            info!(generation, "Disconnected from broker");
        }
    }

    /// Broadcast a new incident on the alert topic.
    #[tracing::instrument(name = "session.publish_alert", skip_all, fields(incident_id = %incident.incident_id))]
    pub async fn publish_emergency_alert(&self, incident: &IncidentRecord) {
        match codec::encode_incident(incident) {
            Ok(payload) => self.publish(ALERT_TOPIC, payload).await,
            Err(e) => error!(error = %e, "Failed to encode incident"),
        }
    }

    /// Announce a status change of an incident.
    #[tracing::instrument(name = "session.publish_status", skip_all, fields(incident_id = %incident_id, status = ?status))]
    pub async fn publish_status_update(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        responder_id: Option<&str>,
    ) {
        let envelope = StatusEnvelope::now(incident_id, status, responder_id.map(str::to_string));
        match codec::encode_status(&envelope) {
            Ok(payload) => self.publish(&status_topic(incident_id), payload).await,
            Err(e) => error!(error = %e, "Failed to encode status update"),
        }
    }

    /// Send a free-form reply about an incident.
    #[tracing::instrument(name = "session.publish_response", skip_all, fields(incident_id = %incident_id))]
    pub async fn publish_response(&self, incident_id: &str, response: &str) {
        let envelope = ResponseEnvelope::now(incident_id, response, self.responder_id.clone());
        match codec::encode_response(&envelope) {
            Ok(payload) => self.publish(&response_topic(incident_id), payload).await,
            Err(e) => error!(error = %e, "Failed to encode response"),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) {
        let session = self.ctx.shared.lock().session.clone();
        let Some(session) = session else {
            warn!(topic = %topic, "No broker session, dropping publish");
            return;
        };

        let bytes = payload.len();
        match session
            .publish(topic, Bytes::from(payload), QoS::AtLeastOnce, false)
            .await
        {
            Ok(()) => debug!(topic = %topic, bytes, "Published"),
            Err(e) => error!(topic = %topic, error = %e, "Publish failed"),
        }
    }
}

/// Drive one connect attempt to its outcome.
async fn run_connect(
    ctx: SessionContext,
    generation: u64,
    options: ConnectOptions,
    outcome_tx: oneshot::Sender<ConnectOutcome>,
) {
    let connected = match tokio::time::timeout(
        options.connection_timeout,
        ctx.transport.connect(&options),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(options.connection_timeout)),
    };

    let outcome = match connected {
        Ok((session, events)) => establish(&ctx, generation, session, events).await,
        Err(e) => {
            if ctx.shared.transition(generation, ConnectionState::Failed) {
                warn!(generation, error = %e, "Connect failed");
                ConnectOutcome::Failed(e)
            } else {
                debug!(generation, error = %e, "Ignoring failure of superseded connect");
                ConnectOutcome::Superseded
            }
        }
    };

    let _ = outcome_tx.send(outcome);
}

/// Install a freshly connected session, subscribe and start its event pump.
async fn establish(
    ctx: &SessionContext,
    generation: u64,
    session: Arc<dyn TransportSession>,
    events: EventStream,
) -> ConnectOutcome {
    let installed = {
        let mut slot = ctx.shared.lock();
        if slot.generation == generation {
            slot.session = Some(Arc::clone(&session));
            ctx.shared.set_state(ConnectionState::Connected);
            true
        } else {
            false
        }
    };
    if !installed {
        debug!(generation, "Connect superseded after success, closing session");
        close_session(session, generation).await;
        return ConnectOutcome::Superseded;
    }
    info!(generation, "Connected to broker");

    let subscribed = subscribe_routes(ctx, &session, generation).await;

    let pump = tokio::spawn(pump_events(
        ctx.clone(),
        generation,
        Arc::clone(&session),
        events,
        Arc::new(AtomicBool::new(subscribed)),
    ));
    let mut slot = ctx.shared.lock();
    if slot.generation != generation {
        pump.abort();
        return ConnectOutcome::Superseded;
    }
    slot.pump = Some(pump);

    ConnectOutcome::Connected { subscribed }
}

/// Subscribe to every route in one batch. Returns whether it succeeded.
async fn subscribe_routes(
    ctx: &SessionContext,
    session: &Arc<dyn TransportSession>,
    generation: u64,
) -> bool {
    let filters: Vec<(String, QoS)> = ctx
        .router
        .subscription_filters()
        .into_iter()
        .map(|filter| (filter.to_string(), QoS::AtLeastOnce))
        .collect();

    match session.subscribe(&filters).await {
        Ok(()) => {
            info!(generation, filters = filters.len(), "Subscribed to incident topics");
            true
        }
        Err(e) => {
            error!(
                generation,
                error = %e,
                "Subscription failed, session stays connected without inbound routing"
            );
            false
        }
    }
}

/// Deliver a session's events in arrival order until it is superseded or
/// its stream closes.
///
/// Resubscription after a reconnect runs in its own task so the stream keeps
/// draining while the broker acknowledges it.
async fn pump_events(
    ctx: SessionContext,
    generation: u64,
    session: Arc<dyn TransportSession>,
    mut events: EventStream,
    routing: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        if !ctx.shared.is_current(generation) {
            debug!(generation, "Dropping event of superseded session");
            return;
        }

        match event {
            TransportEvent::Message { topic, payload } => {
                if routing.load(Ordering::SeqCst) {
                    ctx.router.dispatch(&topic, &payload).await;
                } else {
                    debug!(topic = %topic, "Inbound routing not installed, dropping message");
                }
            }
            TransportEvent::ConnectionLost(reason) => {
                if ctx.shared.transition_from(
                    generation,
                    ConnectionState::Connected,
                    ConnectionState::Disconnected,
                ) {
                    warn!(generation, reason = %reason, "Connection to broker lost");
                }
            }
            TransportEvent::Reconnected => {
                if ctx.shared.transition_from(
                    generation,
                    ConnectionState::Disconnected,
                    ConnectionState::Connected,
                ) {
                    info!(generation, "Reconnected to broker");
                    tokio::spawn(resubscribe(
                        ctx.clone(),
                        Arc::clone(&session),
                        generation,
                        Arc::clone(&routing),
                    ));
                }
            }
        }
    }

    if ctx.shared.transition_from(
        generation,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
    ) {
        warn!(generation, "Session event stream closed");
    }
}

async fn resubscribe(
    ctx: SessionContext,
    session: Arc<dyn TransportSession>,
    generation: u64,
    routing: Arc<AtomicBool>,
) {
    let subscribed = subscribe_routes(&ctx, &session, generation).await;
    if ctx.shared.is_current(generation) {
        routing.store(subscribed, Ordering::SeqCst);
    }
}

/// Close a session that `generation` replaced.
async fn close_session(session: Arc<dyn TransportSession>, generation: u64) {
    if let Err(e) = session.disconnect().await {
        warn!(generation, error = %e, "Failed to close replaced session");
    }
}
