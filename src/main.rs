/// Entry point for the Creo Logs agent.
///
/// Discovers the files and containers to tail from the configured sources and
/// keeps tailing them until interrupted.
///
/// # Errors
///
/// Returns an error if initialization fails (e.g., a missing or invalid
/// configuration file).
///
/// # Examples
///
/// ```bash
/// CREO_LOGS_CONFIG=./config.json RUST_LOG=info cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    creo_logs::run().await
}
