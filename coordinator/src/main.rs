//! `coordinator` — the request front end. Accepts `PUT`/`GET`/`DELETE` on
//! `/blob/{key}`, fanning writes across the replicas the ring selects and
//! keeping the metadata index in agreement with them.

use std::net::SocketAddr;

use clap::Parser;
use clap_blocks::ClusterConfig;
use trogging::LoggingConfig;

#[derive(Debug, Parser)]
struct Config {
    /// Port to listen on.
    #[clap(long, env = "VAULT_COORDINATOR_PORT", default_value = "8080")]
    port: u16,

    #[clap(flatten)]
    cluster: ClusterConfig,

    #[clap(flatten)]
    logging: LoggingConfig,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    config.logging.init();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    if let Err(err) = coordinator::run(addr, config.cluster.db, config.cluster.volumes, config.cluster.replicas).await {
        observability_deps::tracing::error!(%err, "coordinator exited with an error");
        std::process::exit(1);
    }
}
