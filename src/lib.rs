//! Crashwatch - crash alert messaging core
//!
//! A topic-routed pub/sub session manager for emergency crash alerts.
//! Publishers broadcast incident records; responders receive them,
//! acknowledge and resolve them, and every participant tracks the
//! resulting status changes.

pub mod codec;
pub mod config;
pub mod handlers;
pub mod model;
pub mod router;
pub mod session;
pub mod simulator;
pub mod store;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

pub use model::{ConnectionState, IncidentRecord, IncidentStatus};
pub use router::TopicRouter;
pub use session::{ConnectAttempt, ConnectOutcome, SessionError, SessionManager};
