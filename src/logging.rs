use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "TREETIDY_LOG";

/// Install the global subscriber. Logs go to stderr so they never mix with
/// the organizer's own output on stdout.
///
/// `TREETIDY_LOG` wins when set; otherwise the level is `warn`, or `info`
/// with `verbose`.
pub fn init_logger(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_filter.to_string());
    let filter_layer =
        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter_layer)
        .try_init();
}
