//! Consumers of decoded inbound messages.
//!
//! - `IncidentTracker`: applies alerts and status changes to the incident store
//! - `LogHandler`: presentation stand-in that logs what arrives

mod logging;
mod tracker;

pub use logging::LogHandler;
pub use tracker::IncidentTracker;
