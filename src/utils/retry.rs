//! Retry utilities: backoff builders for broker reconnection.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Upper bound on the delay between reconnect attempts.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Backoff for broker reconnection after a lost connection.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_max_times(30)
        .with_jitter()
}

/// Delay sequence for reconnect attempts that never runs out.
///
/// Follows `connection_backoff`, then keeps retrying at the maximum delay.
pub fn reconnect_delays() -> impl Iterator<Item = Duration> + Send {
    connection_backoff()
        .build()
        .chain(std::iter::repeat(MAX_RECONNECT_DELAY))
}
