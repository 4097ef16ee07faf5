//! relay-server: accept peers and broadcast every frame to everyone else.

use msgrelay::config::ServerConfig;
use msgrelay::server::Server;
use msgrelay::shutdown;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status after a clean interrupt-driven shutdown.
const EXIT_INTERRUPTED: i32 = 2;

fn main() {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay-server: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        "Starting relay server"
    );

    if let Err(e) = shutdown::install_sigint_handler() {
        error!(error = %e, "Failed to install signal handler");
        std::process::exit(1);
    }

    let mut server = match Server::bind(&config.host, config.port) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    // run() only returns Ok once an interrupt was observed.
    if let Err(e) = server.run(shutdown::requested) {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    std::process::exit(EXIT_INTERRUPTED);
}
