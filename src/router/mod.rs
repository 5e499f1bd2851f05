//! Topic routing for inbound messages.
//!
//! Maps an inbound `(topic, payload)` pair onto one of three fixed routes by
//! topic prefix, decodes the payload with the codec and hands the typed
//! message to every registered `MessageHandler`.
//!
//! A bad message never breaks the callback path: unmatched topics and
//! undecodable payloads are logged and dropped, and the router carries on
//! with the next delivery.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::codec;
use crate::model::{IncidentRecord, ResponseEnvelope, StatusEnvelope};
use crate::store::StoreError;

/// Topic every alert is published to.
pub const ALERT_TOPIC: &str = "crash/alerts/region";
/// Prefix of alert topics.
pub const ALERT_PREFIX: &str = "crash/alerts/";
/// Prefix of per-incident status topics.
pub const STATUS_PREFIX: &str = "crash/status/";
/// Prefix of per-incident response topics.
pub const RESPONSE_PREFIX: &str = "crash/responses/";

/// Topic for status changes of one incident.
pub fn status_topic(incident_id: &str) -> String {
    format!("{}{}", STATUS_PREFIX, incident_id)
}

/// Topic for responder replies about one incident.
pub fn response_topic(incident_id: &str) -> String {
    format!("{}{}", RESPONSE_PREFIX, incident_id)
}

/// Decode-and-handle path selected for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Alert,
    Status,
    Response,
}

impl Route {
    /// Every route, in subscription order.
    pub const ALL: [Route; 3] = [Route::Alert, Route::Status, Route::Response];

    /// Topic prefix served by this route.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Alert => ALERT_PREFIX,
            Self::Status => STATUS_PREFIX,
            Self::Response => RESPONSE_PREFIX,
        }
    }

    /// Single-level wildcard filter subscribed for this route.
    pub fn subscription_filter(&self) -> &'static str {
        match self {
            Self::Alert => "crash/alerts/+",
            Self::Status => "crash/status/+",
            Self::Response => "crash/responses/+",
        }
    }

    /// Pick the route for an inbound topic, preferring the longest prefix.
    pub fn for_topic(topic: &str) -> Option<Route> {
        Self::ALL
            .iter()
            .filter(|route| topic.starts_with(route.prefix()))
            .max_by_key(|route| route.prefix().len())
            .copied()
    }
}

/// Check if a topic matches an MQTT subscription filter.
///
/// Matching rules:
/// - `+` matches exactly one level
/// - `#` (last level only) matches the parent level and everything below
/// - Topics starting with `$` are never matched by a leading wildcard
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Alert(IncidentRecord),
    Status(StatusEnvelope),
    Response(ResponseEnvelope),
}

impl InboundMessage {
    /// Route this message arrived on.
    pub fn route(&self) -> Route {
        match self {
            Self::Alert(_) => Route::Alert,
            Self::Status(_) => Route::Status,
            Self::Response(_) => Route::Response,
        }
    }

    /// Incident the message is about.
    pub fn incident_id(&self) -> &str {
        match self {
            Self::Alert(record) => &record.incident_id,
            Self::Status(envelope) => &envelope.incident_id,
            Self::Response(envelope) => &envelope.incident_id,
        }
    }
}

/// Errors a handler may report back to the router.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Consumer of decoded inbound messages (presentation layer, incident tracker).
pub trait MessageHandler: Send + Sync {
    /// Process one decoded message.
    fn handle(&self, message: Arc<InboundMessage>)
        -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// Outcome of routing one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Decoded and all handlers succeeded.
    Dispatched(Route),
    /// Decoded, but at least one handler failed.
    HandlerFailed(Route),
    /// The payload could not be decoded and was dropped.
    DecodeError(Route),
    /// No route matches the topic; dropped without invoking a handler.
    Unrouted,
}

impl DispatchResult {
    /// Returns true if the message reached the handlers and all succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

/// Routes inbound transport deliveries to registered handlers.
#[derive(Clone, Default)]
pub struct TopicRouter {
    handlers: Arc<RwLock<Vec<Box<dyn MessageHandler>>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all routes.
    pub async fn register(&self, handler: Box<dyn MessageHandler>) {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };
        debug!(handler_count = count, "Handler registered with topic router");
    }

    /// Subscription filters covering every route.
    pub fn subscription_filters(&self) -> Vec<&'static str> {
        Route::ALL
            .iter()
            .map(|route| route.subscription_filter())
            .collect()
    }

    /// Decode and dispatch one inbound delivery.
    #[tracing::instrument(name = "router.dispatch", skip_all, fields(topic = %topic))]
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchResult {
        let Some(route) = Route::for_topic(topic) else {
            debug!(topic = %topic, "No route for topic, dropping message");
            return DispatchResult::Unrouted;
        };

        let decoded = match route {
            Route::Alert => codec::decode_incident(payload).map(InboundMessage::Alert),
            Route::Status => codec::decode_status(payload).map(InboundMessage::Status),
            Route::Response => codec::decode_response(payload).map(InboundMessage::Response),
        };

        let message = match decoded {
            Ok(message) => Arc::new(message),
            Err(e) => {
                warn!(
                    topic = %topic,
                    bytes = payload.len(),
                    error = %e,
                    "Dropping undecodable message"
                );
                return DispatchResult::DecodeError(route);
            }
        };

        debug!(
            route = ?route,
            incident_id = %message.incident_id(),
            "Dispatching inbound message"
        );

        if dispatch_to_handlers(&self.handlers, &message).await {
            DispatchResult::Dispatched(route)
        } else {
            DispatchResult::HandlerFailed(route)
        }
    }
}

/// Dispatch a message to all registered handlers.
///
/// Calls each handler in sequence, logging errors but continuing to subsequent
/// handlers. Returns `true` if all handlers succeeded.
async fn dispatch_to_handlers(
    handlers: &Arc<RwLock<Vec<Box<dyn MessageHandler>>>>,
    message: &Arc<InboundMessage>,
) -> bool {
    let handlers_guard = handlers.read().await;
    let mut all_succeeded = true;

    for handler in handlers_guard.iter() {
        if let Err(e) = handler.handle(Arc::clone(message)).await {
            error!(
                incident_id = %message.incident_id(),
                error = %e,
                "Handler failed"
            );
            all_succeeded = false;
        }
    }

    all_succeeded
}

#[cfg(test)]
mod tests;
