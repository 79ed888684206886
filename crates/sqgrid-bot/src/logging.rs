//! Logging initialization.
//!
//! Console output always; at debug level an additional file layer writes
//! under `log/` with rotation at day boundaries. The returned guard must
//! stay alive for the process lifetime or buffered lines are lost.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_DIR: &str = "log";
const LOG_FILE_PREFIX: &str = "sqgrid.log";

/// Initialize tracing from the configured level. `RUST_LOG` overrides.
pub fn init_logging(level: &str) -> Option<WorkerGuard> {
    let level = normalize_level(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = fmt::layer().with_target(true);

    if level == "debug" {
        let appender = tracing_appender::rolling::daily(LOG_DIR, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(filter).with(console).init();
        None
    }
}

fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" => "error",
        _ => "info",
    }
}
