use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// The configured level is the default; a `RUST_LOG` directive overrides
/// it. `format = "json"` targets log collectors, anything else gets the
/// human-readable formatter. With `file_path` set, output is appended to
/// that file instead of the terminal (without ANSI escapes).
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("unknown log level `{}`", config.level))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let layer = match (config.format.as_str(), config.file_path.as_deref()) {
        ("json", Some(path)) => fmt::layer().json().with_writer(log_file(path)?).boxed(),
        ("json", None) => fmt::layer().json().boxed(),
        (_, Some(path)) => fmt::layer()
            .with_ansi(false)
            .with_writer(log_file(path)?)
            .boxed(),
        (_, None) => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

fn log_file(path: &str) -> anyhow::Result<Arc<std::fs::File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file `{path}`"))?;
    Ok(Arc::new(file))
}
