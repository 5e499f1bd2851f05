//! crashwatch: crash alert publisher / responder
//!
//! Publisher mode broadcasts simulated crash incidents. Subscriber mode
//! receives alerts, acknowledges each new one and tracks status changes.
//!
//! ## Configuration
//! - First argument: optional path to a YAML config file
//! - CRASHWATCH_CONFIG: path to a YAML config file
//! - CRASHWATCH__*: overrides, e.g. CRASHWATCH__BROKER__HOST
//! - CRASHWATCH_LOG: tracing filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crashwatch::config::{Config, Mode, TransportKind};
use crashwatch::handlers::{IncidentTracker, LogHandler};
use crashwatch::model::{IncidentRecord, IncidentStatus};
use crashwatch::router::{HandlerError, InboundMessage, MessageHandler, TopicRouter};
use crashwatch::session::{default_client_id, ConnectOutcome, SessionManager};
use crashwatch::simulator::IncidentSimulator;
use crashwatch::store::{spawn_retention_task, IncidentStore, MemoryIncidentStore, RetentionPolicy};
use crashwatch::transport::{ChannelTransport, Transport};
use crashwatch::utils::bootstrap::{init_tracing, shutdown_signal};

/// How often the retention task checks whether a sweep is due.
const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Response sent after acknowledging an alert.
const ACKNOWLEDGE_RESPONSE: &str = "Responder en route";

/// Forwards new alerts to the responder loop.
struct AlertInbox {
    alerts: mpsc::Sender<IncidentRecord>,
}

impl MessageHandler for AlertInbox {
    fn handle(&self, message: Arc<InboundMessage>) -> BoxFuture<'static, Result<(), HandlerError>> {
        let alerts = self.alerts.clone();
        Box::pin(async move {
            if let InboundMessage::Alert(incident) = &*message {
                if incident.status == IncidentStatus::Active {
                    alerts
                        .send(incident.clone())
                        .await
                        .map_err(|_| HandlerError::Rejected("responder loop stopped".into()))?;
                }
            }
            Ok(())
        })
    }
}

fn build_transport(kind: TransportKind) -> Result<Arc<dyn Transport>, Box<dyn std::error::Error>> {
    match kind {
        TransportKind::Channel => Ok(Arc::new(ChannelTransport::new())),
        #[cfg(feature = "mqtt")]
        TransportKind::Mqtt => Ok(Arc::new(crashwatch::transport::MqttTransport::new())),
        #[cfg(not(feature = "mqtt"))]
        TransportKind::Mqtt => Err("built without the mqtt feature".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(
        mode = ?config.mode,
        transport = ?config.transport,
        host = %config.broker.host,
        port = config.broker.port,
        "crashwatch starting"
    );

    let store = Arc::new(MemoryIncidentStore::new());
    let retention = spawn_retention_task(
        store.clone(),
        Arc::new(RetentionPolicy::new(config.retention.days)),
        RETENTION_CHECK_INTERVAL,
    );

    let router = TopicRouter::new();
    router
        .register(Box::new(IncidentTracker::new(store.clone())))
        .await;
    router
        .register(Box::new(LogHandler::new(config.notifications_enabled)))
        .await;

    let (alerts_tx, alerts_rx) = mpsc::channel(64);
    if config.mode == Mode::Subscriber {
        router
            .register(Box::new(AlertInbox { alerts: alerts_tx }))
            .await;
    }

    let responder_id = config.responder_id.clone().unwrap_or_else(default_client_id);
    let manager = SessionManager::new(build_transport(config.transport)?, router)
        .with_responder_id(responder_id);

    let mut state_rx = manager.watch_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!(state = %state, "Connection state");
        }
    });

    let outcome = manager
        .connect(
            &config.broker.host,
            config.broker.port,
            config.broker.client_id.clone(),
        )?
        .await;
    match outcome {
        ConnectOutcome::Connected { subscribed: true } => {}
        ConnectOutcome::Connected { subscribed: false } => {
            warn!("Connected without subscriptions, inbound messages will not arrive")
        }
        ConnectOutcome::Failed(e) => {
            error!(error = %e, "Could not connect to broker");
            retention.stop();
            return Err(e.into());
        }
        ConnectOutcome::Superseded => {}
    }

    match config.mode {
        Mode::Publisher => run_publisher(&manager, store.as_ref(), config.alert_interval_secs).await,
        Mode::Subscriber => run_responder(&manager, alerts_rx).await,
    }

    let active = store.count_by_status(IncidentStatus::Active).await?;
    let acknowledged = store.count_by_status(IncidentStatus::Acknowledged).await?;
    let resolved = store.count_by_status(IncidentStatus::Resolved).await?;
    info!(active, acknowledged, resolved, "Incident summary");

    retention.stop();
    manager.disconnect().await;
    info!("crashwatch stopped");
    Ok(())
}

/// Publish simulated alerts until shutdown.
async fn run_publisher(
    manager: &SessionManager,
    store: &dyn IncidentStore,
    interval_secs: Option<u64>,
) {
    let mut simulator = IncidentSimulator::new();

    let Some(secs) = interval_secs.filter(|secs| *secs > 0) else {
        publish_simulated(manager, store, &mut simulator).await;
        shutdown_signal().await;
        return;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => publish_simulated(manager, store, &mut simulator).await,
        }
    }
}

async fn publish_simulated(
    manager: &SessionManager,
    store: &dyn IncidentStore,
    simulator: &mut IncidentSimulator,
) {
    let incident = simulator.generate();
    if let Err(e) = store.insert(incident.clone()).await {
        error!(incident_id = %incident.incident_id, error = %e, "Failed to store incident");
    }
    info!(
        incident_id = %incident.incident_id,
        latitude = incident.location.latitude,
        longitude = incident.location.longitude,
        "Publishing simulated crash"
    );
    manager.publish_emergency_alert(&incident).await;
}

/// Acknowledge every new alert until shutdown.
async fn run_responder(manager: &SessionManager, mut alerts: mpsc::Receiver<IncidentRecord>) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            alert = alerts.recv() => {
                let Some(incident) = alert else { break };
                info!(incident_id = %incident.incident_id, "Acknowledging alert");
                manager
                    .publish_status_update(
                        &incident.incident_id,
                        IncidentStatus::Acknowledged,
                        manager.responder_id(),
                    )
                    .await;
                manager
                    .publish_response(&incident.incident_id, ACKNOWLEDGE_RESPONSE)
                    .await;
            }
        }
    }
}
