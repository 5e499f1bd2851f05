//! Pure utility functions.
//!
//! Process bootstrap and backoff helpers shared by the binary and transports.

pub mod bootstrap;
pub mod retry;
