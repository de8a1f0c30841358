//! `volume` — reference implementation of the blob store's volume wire
//! contract. Stores content-addressed files under `--root`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use trogging::LoggingConfig;

/// Run a reference volume server.
#[derive(Debug, Parser)]
struct Config {
    /// Port to listen on.
    #[clap(long, env = "VAULT_VOLUME_PORT", default_value = "8081")]
    port: u16,

    /// Root directory for blob storage.
    #[clap(long, env = "VAULT_VOLUME_ROOT", default_value = "./data")]
    root: PathBuf,

    #[clap(flatten)]
    logging: LoggingConfig,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    config.logging.init();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    if let Err(err) = volume::run(addr, config.root).await {
        observability_deps::tracing::error!(%err, "volume server exited with an error");
        std::process::exit(1);
    }
}
