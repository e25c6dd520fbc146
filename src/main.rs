//! bulk-stream: a WebSocket bulk message server
//!
//! Every client that upgrades receives one large text message, sent in
//! bounded fragments only as fast as the connection drains.
//!
//! Features:
//! - Incompressible (pseudorandom) or compressible (repeated text) payload
//! - Tunable message and fragment sizes
//! - Multi-threaded mio workers sharing the port via SO_REUSEPORT
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = config.workers,
        total_size = config.total_size,
        chunk_size = config.chunk_size,
        payload = ?config.payload,
        subprotocol = %config.subprotocol,
        "Starting bulk-stream server"
    );

    runtime::run(config)?;
    Ok(())
}
