//! relay-client: bridge stdin/stdout to a relay server.

use msgrelay::client::{self, BridgeOutcome};
use msgrelay::config::ClientConfig;
use msgrelay::frame::MAX_FRAME_LEN;
use tracing_subscriber::EnvFilter;

/// Exit status when the server declares an over-length frame.
const EXIT_OVERSIZED_FRAME: i32 = 100;

fn main() {
    let config = ClientConfig::load();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries relayed messages; everything else goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match client::run(&config.host, config.port) {
        Ok(BridgeOutcome::Clean) => {}
        Ok(BridgeOutcome::OversizedFrame { declared }) => {
            eprintln!(
                "relay-client: server sent an over-length frame ({declared} > {MAX_FRAME_LEN})"
            );
            std::process::exit(EXIT_OVERSIZED_FRAME);
        }
        Err(e) => {
            eprintln!("relay-client: {e}");
            std::process::exit(1);
        }
    }
}
