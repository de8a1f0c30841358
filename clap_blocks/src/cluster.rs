//! Flags describing the volume cluster and metadata index a binary should
//! talk to: `--db`, `--volumes`, `--replicas`.

use std::path::PathBuf;

/// Cluster-wide configuration shared by the coordinator and the maintenance
/// CLI: where the metadata index lives, which volumes exist, and how many
/// replicas each key targets.
#[derive(Debug, Clone, clap::Parser)]
pub struct ClusterConfig {
    /// Path to the SQLite metadata index file.
    #[clap(long = "db", env = "VAULT_DB_PATH", default_value = "metadata.db")]
    pub db: PathBuf,

    /// Comma-separated list of volume server base URLs, e.g.
    /// `http://v1:8081,http://v2:8081`.
    #[clap(
        long = "volumes",
        env = "VAULT_VOLUMES",
        default_value = "http://localhost:8081",
        use_value_delimiter = true
    )]
    pub volumes: Vec<String>,

    /// Number of replicas each key's payload is written to.
    #[clap(long = "replicas", env = "VAULT_REPLICAS", default_value = "3")]
    pub replicas: usize,
}

impl ClusterConfig {
    /// Build the ring implied by this configuration, inserting every
    /// configured volume.
    pub fn build_ring(&self) -> ring::Ring {
        let ring = ring::Ring::new(ring::DEFAULT_VNODES);
        for volume in &self.volumes {
            ring.add(volume.trim().trim_end_matches('/').to_string());
        }
        ring
    }
}
