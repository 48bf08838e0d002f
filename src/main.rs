//! grow-a-httpd: A single-threaded file server
//!
//! Features:
//! - Directory listings with an upload form
//! - Chunked file downloads
//! - Streaming multipart/form-data uploads
//! - Configuration via CLI arguments or TOML file
//!
//! All sockets are multiplexed on one thread by a readiness reactor over
//! mio (epoll on Linux, kqueue on macOS).

mod config;
mod protocols;
mod runtime;
mod server;

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
        host = %config.host,
        port = config.port,
        root = %config.root.display(),
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        "Starting grow-a-httpd server"
    );

    server::run(config)?;
    Ok(())
}
