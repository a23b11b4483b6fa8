//! Structured logging setup, grounded on `tracer/src/lib.rs`'s
//! `init_tracing`, stripped down to the single-process case: no OTel
//! exporter, just an env-filtered, human-readable subscriber on stderr.

use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber once at start-up. `default_level` is used
/// when `RUST_LOG` is unset.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}
