//! Tracing setup.
//!
//! Human-readable stderr output is always on, filtered by `RUST_LOG`
//! (default `info`). Passing a log directory adds a JSON layer with daily
//! rotation for log shipping; the returned guard flushes that file on
//! drop and must outlive the server.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Returns the appender guard when file logging is enabled; keep it alive
/// for the process lifetime, or the last buffered entries are lost.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter).with(stderr);

    let Some(dir) = log_dir else {
        registry.init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).map_err(|e| {
        anyhow::anyhow!("failed to create logs directory {}: {e}", dir.display())
    })?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "kobo-companion.log"));
    registry
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .init();
    Ok(Some(guard))
}
