//! Tracing setup for simulation runs and tests.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Installs a console subscriber for simulation output.
///
/// `RUST_LOG` takes precedence over `default_level`. Uses the test writer so
/// output is captured per test.
///
/// # Errors
/// - `TryInitError` - A global subscriber is already installed
pub fn init_tracing(default_level: Level) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_test_writer()
        .with_filter(filter);

    tracing_subscriber::registry().with(console_layer).try_init()
}
