//! Request coordinator: the HTTP front end that fans `PUT`/`GET`/`DELETE` of
//! a key out across the replica set a [`ring::Ring`] selects for it, keeping
//! the [`index::Index`] in agreement with what was actually written.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use index::Index;
use observability_deps::tracing::{error, info, warn};
use rand::seq::SliceRandom;
use ring::Ring;
use snafu::{ResultExt, Snafu};
use volume_client::{locator, VolumeClient};

/// Errors that can prevent the coordinator from starting.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The metadata index could not be opened.
    #[snafu(display("could not open index: {}", source))]
    OpenIndex { source: index::Error },

    /// The server failed to bind or run.
    #[snafu(display("server error: {}", source))]
    Serve { source: hyper::Error },
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state behind every request handler.
#[derive(Debug)]
struct App {
    index: Index,
    ring: Ring,
    client: VolumeClient,
    replicas: usize,
}

/// Run the coordinator, serving until the process is killed.
pub async fn run(addr: SocketAddr, db: std::path::PathBuf, volumes: Vec<String>, replicas: usize) -> Result<()> {
    let (local_addr, server) = bind(addr, db, volumes, replicas).await?;
    info!(%local_addr, "coordinator listening");
    server.await.context(ServeSnafu)
}

/// Bind the server without running it, returning the address actually bound
/// and the future that serves requests. Split out so tests can bind an
/// ephemeral port.
pub async fn bind(
    addr: SocketAddr,
    db: std::path::PathBuf,
    volumes: Vec<String>,
    replicas: usize,
) -> Result<(SocketAddr, impl std::future::Future<Output = hyper::Result<()>>)> {
    let index = Index::open(&db).context(OpenIndexSnafu)?;
    let ring = Ring::new(ring::DEFAULT_VNODES);
    for volume in &volumes {
        ring.add(volume.trim().trim_end_matches('/').to_string());
    }

    let app = Arc::new(App {
        index,
        ring,
        client: VolumeClient::new(),
        replicas,
    });

    let make_svc = make_service_fn(move |_conn| {
        let app = Arc::clone(&app);
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, Arc::clone(&app)))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    let local_addr = server.local_addr();
    Ok((local_addr, server))
}

fn status(code: StatusCode) -> Response<Body> {
    Response::builder().status(code).body(Body::empty()).unwrap()
}

fn health() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"status":"ok"}"#))
        .unwrap()
}

/// Extract the key from a `/blob/{key}` path. Returns `None` for an empty
/// or malformed key.
fn key_from_path(path: &str) -> Option<&str> {
    let key = path.strip_prefix("/blob/")?;
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

async fn handle(req: Request<Body>, app: Arc<App>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method().clone(), req.uri().path().to_string()) {
        (Method::GET, path) if path == "/health" => Ok(health()),
        (Method::PUT, path) => match key_from_path(&path) {
            Some(key) => handle_put(req, key.to_string(), &app).await,
            None => Ok(status(StatusCode::BAD_REQUEST)),
        },
        (Method::GET, path) | (Method::HEAD, path) => match key_from_path(&path) {
            Some(key) => handle_get(key, &app).await,
            None => Ok(status(StatusCode::BAD_REQUEST)),
        },
        (Method::DELETE, path) => match key_from_path(&path) {
            Some(key) => handle_delete(key, &app).await,
            None => Ok(status(StatusCode::BAD_REQUEST)),
        },
        _ => Ok(status(StatusCode::METHOD_NOT_ALLOWED)),
    };

    Ok(response.unwrap_or_else(|err: Error| {
        error!(%err, "coordinator request failed");
        status(StatusCode::INTERNAL_SERVER_ERROR)
    }))
}

async fn handle_put(req: Request<Body>, key: String, app: &App) -> Result<Response<Body>> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(err) => {
            warn!(key, %err, "failed to read request body");
            return Ok(status(StatusCode::BAD_REQUEST));
        }
    };

    let replicas = app.ring.select(&key, app.replicas);
    if replicas.len() < app.replicas {
        warn!(key, got = replicas.len(), want = app.replicas, "ring has insufficient capacity");
        return Ok(status(StatusCode::SERVICE_UNAVAILABLE));
    }

    let writes = replicas.iter().map(|node| write_replica(app, node, body.clone()));
    let results = join_all(writes).await;

    let mut locators = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(locator) => locators.push(locator),
            Err(err) => {
                warn!(key, %err, "replica write failed, leaving index untouched");
                return Ok(status(StatusCode::BAD_GATEWAY));
            }
        }
    }

    if let Err(err) = app.index.put(&key, &locators) {
        error!(key, %err, "index write failed after replica writes succeeded");
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    Ok(status(StatusCode::CREATED))
}

async fn write_replica(app: &App, node: &str, body: Bytes) -> volume_client::Result<String> {
    let digest = app.client.write(node, body).await?;
    Ok(locator::build(node, &digest))
}

async fn handle_get(key: &str, app: &App) -> Result<Response<Body>> {
    let locators = match app.index.get(key) {
        Ok(Some(locators)) => locators,
        Ok(None) => return Ok(status(StatusCode::NOT_FOUND)),
        Err(err) => {
            error!(key, %err, "index lookup failed");
            return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    // Choice among replicas only spreads load; correctness doesn't depend on it.
    let chosen = locators.choose(&mut rand::thread_rng()).expect("locators is never empty");

    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(hyper::header::LOCATION, chosen.as_str())
        .body(Body::empty())
        .unwrap())
}

async fn handle_delete(key: &str, app: &App) -> Result<Response<Body>> {
    let locators = match app.index.get(key) {
        Ok(Some(locators)) => locators,
        Ok(None) => return Ok(status(StatusCode::NOT_FOUND)),
        Err(err) => {
            error!(key, %err, "index lookup failed");
            return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    let deletes = locators.iter().map(|locator| async move {
        if let Err(err) = app.client.delete(locator).await {
            warn!(key, locator, %err, "replica delete failed, orphan left for compact");
        }
    });
    join_all(deletes).await;

    if let Err(err) = app.index.delete(key) {
        error!(key, %err, "index delete failed");
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    Ok(status(StatusCode::NO_CONTENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_coordinator(volumes: Vec<String>, replicas: usize) -> (String, tokio::task::JoinHandle<()>) {
        let db_dir = tempfile::tempdir().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (addr, server) = bind(addr, db_dir.path().join("metadata.db"), volumes, replicas).await.unwrap();
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });
        // Keep the temp dir alive for the test's duration by leaking it; the
        // OS reclaims it on process exit, which is fine for a short-lived test.
        std::mem::forget(db_dir);
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn put_then_get_redirects_to_a_replica() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 1).await;

        let http = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap();
        let put = http.put(format!("{base}/blob/mykey")).body("hello world").send().await.unwrap();
        assert_eq!(put.status(), reqwest::StatusCode::CREATED);

        let get = http.get(format!("{base}/blob/mykey")).send().await.unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::FOUND);
        assert!(get.headers().get(reqwest::header::LOCATION).is_some());
    }

    #[tokio::test]
    async fn get_of_unknown_key_is_not_found() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 1).await;

        let http = reqwest::Client::new();
        let get = http.get(format!("{base}/blob/nope")).send().await.unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_fails_service_unavailable_when_ring_is_short() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 3).await;

        let http = reqwest::Client::new();
        let put = http.put(format!("{base}/blob/mykey")).body("x").send().await.unwrap();
        assert_eq!(put.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn delete_removes_index_row() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 1).await;

        let http = reqwest::Client::new();
        http.put(format!("{base}/blob/mykey")).body("hello").send().await.unwrap();

        let delete = http.delete(format!("{base}/blob/mykey")).send().await.unwrap();
        assert_eq!(delete.status(), reqwest::StatusCode::NO_CONTENT);

        let get = http.get(format!("{base}/blob/mykey")).send().await.unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 1).await;

        let http = reqwest::Client::new();
        let resp = http.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            resp.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(resp.text().await.unwrap(), r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn head_redirects_to_a_replica_like_get() {
        let volume = test_helpers::spawn_volume().await;
        let (base, _handle) = spawn_coordinator(vec![volume.base_url()], 1).await;

        let http = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap();
        http.put(format!("{base}/blob/mykey")).body("hello world").send().await.unwrap();

        let head = http.head(format!("{base}/blob/mykey")).send().await.unwrap();
        assert_eq!(head.status(), reqwest::StatusCode::FOUND);
        assert!(head.headers().get(reqwest::header::LOCATION).is_some());
    }
}
