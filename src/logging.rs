//! Logging setup for harnesses and tests.

use tracing_subscriber::EnvFilter;

/// Sets up logging of events reported while scenarios are loaded and played.
///
/// Use the RUST_LOG environment variable to pick what is shown.
///
/// E.g. to see each step as it is played:
///   RUST_LOG=dnsreplay=DEBUG
///
/// Or to also see why candidate replies were rejected:
///   RUST_LOG=dnsreplay=TRACE
///
/// Calling this more than once is harmless.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}
