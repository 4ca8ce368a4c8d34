//! Logging setup for the `smo` binaries.
//!
//! Console output with uptime timestamps, filtered by `RUST_LOG` or the
//! configured level. Debug builds can also write JSON lines to a file.

use std::path::Path;

use smo_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log written under `log_dir`.
pub const LOG_FILE: &str = "smo.log";

/// Filter directive from the config, falling back to [`DEFAULT_FILTER`].
pub fn filter_directive(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the config's `log_level`. With `debug_build` set and
/// a writable `log_dir`, a JSON file layer is added next to the console.
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));
    let active = env_filter.to_string();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        tracing::debug!("Logging to console and {} ({active})", log_dir.display());
        return;
    }

    subscriber.init();
    tracing::debug!("Logging to console ({active})");
}
