//! Reference implementation of the volume server wire contract: a
//! content-addressed blob store backed by a two-level directory tree on
//! local disk. Not part of the spec's "core" — it exists so the rest of the
//! workspace has a real HTTP endpoint to talk to in tests and locally; any
//! server honoring the same wire contract is a drop-in substitute.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use observability_deps::tracing::{error, info, warn};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

/// Errors that can prevent the server from starting.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The root storage directory could not be created.
    #[snafu(display("could not create root directory {}: {}", path.display(), source))]
    CreateRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The server failed to bind or run.
    #[snafu(display("server error: {}", source))]
    Serve { source: hyper::Error },
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run the reference volume server, serving until the process is killed.
pub async fn run(addr: SocketAddr, root: PathBuf) -> Result<()> {
    let (local_addr, server) = bind(addr, root).await?;
    info!(%local_addr, "volume server listening");
    server.await.context(ServeSnafu)
}

/// Bind the server without running it, returning the address actually bound
/// (useful when `addr`'s port is `0`) and the future that serves requests.
///
/// Split out from [`run`] so tests can bind an ephemeral port and learn its
/// number before awaiting the server.
pub async fn bind(
    addr: SocketAddr,
    root: PathBuf,
) -> Result<(SocketAddr, impl std::future::Future<Output = hyper::Result<()>>)> {
    tokio::fs::create_dir_all(&root)
        .await
        .context(CreateRootSnafu { path: root.clone() })?;

    let root = Arc::new(root);
    let make_svc = make_service_fn(move |_conn| {
        let root = Arc::clone(&root);
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, Arc::clone(&root)))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    let local_addr = server.local_addr();
    Ok((local_addr, server))
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn digest_path(root: &Path, digest: &str) -> PathBuf {
    root.join(&digest[0..2]).join(&digest[2..4]).join(digest)
}

async fn handle(req: Request<Body>, root: Arc<PathBuf>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::PUT, "/") => handle_put(req, &root).await,
        (&Method::GET, "/_list") => handle_list(&root).await,
        (&Method::GET, path) => handle_read(path, &root, false).await,
        (&Method::HEAD, path) => handle_read(path, &root, true).await,
        (&Method::DELETE, path) => handle_delete(path, &root).await,
        _ => Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
    };

    Ok(response.unwrap_or_else(|err| {
        error!(%err, "volume server request failed");
        status(StatusCode::INTERNAL_SERVER_ERROR)
    }))
}

fn status(code: StatusCode) -> Response<Body> {
    Response::builder().status(code).body(Body::empty()).unwrap()
}

async fn handle_put(req: Request<Body>, root: &Path) -> std::io::Result<Response<Body>> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let digest = hex::encode(Sha256::digest(&body));
    let path = digest_path(root, &digest);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    // Content-addressed: an existing file at this path is byte-identical,
    // so overwriting is a no-op in practice and keeps this idempotent.
    tokio::fs::write(&path, &body).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("X-Content-Hash", &digest)
        .body(Body::from(digest))
        .unwrap())
}

async fn handle_read(path: &str, root: &Path, head_only: bool) -> std::io::Result<Response<Body>> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let digest = match segments.as_slice() {
        [d0d1, d2d3, digest] if is_hex_digest(digest) && *d0d1 == &digest[0..2] && *d2d3 == &digest[2..4] => digest,
        _ => return Ok(status(StatusCode::NOT_FOUND)),
    };

    match tokio::fs::read(digest_path(root, digest)).await {
        Ok(bytes) if head_only => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Length", bytes.len())
            .body(Body::empty())
            .unwrap()),
        Ok(bytes) => Ok(Response::new(Body::from(bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(status(StatusCode::NOT_FOUND)),
        Err(e) => Err(e),
    }
}

async fn handle_delete(path: &str, root: &Path) -> std::io::Result<Response<Body>> {
    let digest = match path.rsplit('/').next() {
        Some(d) if is_hex_digest(d) => d,
        _ => return Ok(status(StatusCode::BAD_REQUEST)),
    };

    match tokio::fs::remove_file(digest_path(root, digest)).await {
        Ok(()) => Ok(status(StatusCode::NO_CONTENT)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(status(StatusCode::NOT_FOUND)),
        Err(e) => Err(e),
    }
}

async fn handle_list(root: &Path) -> std::io::Result<Response<Body>> {
    let mut digests = Vec::new();
    let mut level0 = match tokio::fs::read_dir(root).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Response::new(Body::from("[]")));
        }
        Err(e) => return Err(e),
    };

    while let Some(d0) = level0.next_entry().await? {
        if !d0.file_type().await?.is_dir() {
            continue;
        }
        let mut level1 = tokio::fs::read_dir(d0.path()).await?;
        while let Some(d1) = level1.next_entry().await? {
            if !d1.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(d1.path()).await?;
            while let Some(f) = files.next_entry().await? {
                if let Some(name) = f.file_name().to_str() {
                    if is_hex_digest(name) {
                        digests.push(name.to_string());
                    } else {
                        warn!(name, "ignoring non-digest file in volume storage tree");
                    }
                }
            }
        }
    }

    Ok(Response::new(Body::from(serde_json::to_vec(&digests).unwrap())))
}
