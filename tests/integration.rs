//! Integration tests for crashwatch.
//!
//! Every test runs real session managers against the in-process channel
//! broker, so no external MQTT broker is needed.

#[path = "integration/alert_flow_test.rs"]
mod alert_flow_test;

#[path = "integration/connection_test.rs"]
mod connection_test;
