//! sqgrid entry point.

use anyhow::Result;
use clap::Parser;
use sqgrid_bot::{Application, Config};
use tracing::info;

/// Long-biased perpetual-futures grid market maker.
#[derive(Parser, Debug)]
#[command(name = "sqgrid", version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    // Keep the guard alive for the process lifetime; dropping it loses
    // buffered file-log lines.
    let _log_guard = sqgrid_bot::logging::init_logging(&config.system.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config,
        symbol = %config.trading.symbol,
        exchange = %config.app.current_exchange,
        "sqgrid starting"
    );

    Application::new(config).run().await?;

    info!("sqgrid stopped");
    Ok(())
}
