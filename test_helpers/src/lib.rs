//! Test-only helpers shared by the rest of the workspace: spinning up an
//! in-process reference volume server on an ephemeral port, and a one-time
//! logging initializer so test output is readable.
#![warn(missing_debug_implementations, missing_docs)]

use std::net::SocketAddr;

use once_cell::sync::OnceCell;
use tempfile::TempDir;

static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Initialize a `tracing` subscriber suitable for `cargo test` output.
/// Safe to call from every test; only the first call takes effect.
pub fn init_logging() {
    LOG_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
            .with_test_writer()
            .try_init();
    });
}

/// A running in-process volume server, bound to an ephemeral localhost port.
///
/// Dropping this stops serving new connections (the background task is
/// detached, so in-flight requests from a still-open client finish, but no
/// new accepts happen) and removes the temporary storage directory.
#[derive(Debug)]
pub struct SpawnedVolume {
    addr: SocketAddr,
    _data_dir: TempDir,
    handle: tokio::task::JoinHandle<()>,
}

impl SpawnedVolume {
    /// Base URL other components should use to reach this volume.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for SpawnedVolume {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a reference volume server on an ephemeral port, backed by a fresh
/// temporary directory.
pub async fn spawn_volume() -> SpawnedVolume {
    let data_dir = tempfile::tempdir().expect("create temp dir for volume storage");
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (addr, server) = volume::bind(addr, data_dir.path().to_path_buf())
        .await
        .expect("bind reference volume server");

    let handle = tokio::spawn(async move {
        let _ = server.await;
    });

    SpawnedVolume {
        addr,
        _data_dir: data_dir,
        handle,
    }
}
