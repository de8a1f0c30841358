//! Stateless HTTP client for the volume server wire contract: write, read,
//! delete, head-check, and enumerate blobs on a single volume.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

pub mod locator;

use std::time::Duration;

use bytes::Bytes;
use observability_deps::tracing::warn;
use snafu::{ResultExt, Snafu};

/// Default per-request timeout for every volume operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`VolumeClient`] operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The HTTP request itself failed (connection refused, timed out, etc).
    #[snafu(display("request to volume failed: {}", source))]
    Request { source: reqwest::Error },

    /// The volume responded, but not with a status this client understands.
    #[snafu(display("volume returned unexpected status {}", status))]
    UnexpectedStatus { status: reqwest::StatusCode },

    /// A write succeeded but the response body wasn't a usable digest.
    #[snafu(display("volume returned an unparseable digest: {:?}", body))]
    BadDigest { body: String },

    /// The `_list` response body wasn't valid JSON.
    #[snafu(display("could not parse volume's blob listing: {}", source))]
    BadListing { source: serde_json::Error },
}

/// Result alias for [`VolumeClient`] operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of a presence check ([`VolumeClient::head`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The volume has the blob.
    Present,
    /// The volume does not have the blob.
    Absent,
}

/// Outcome of a delete ([`VolumeClient::delete`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The blob existed and was removed.
    Deleted,
    /// The blob did not exist; deleting it is still a success.
    AlreadyAbsent,
}

/// A single HTTP digest that is exactly 64 lowercase hex characters.
fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Thin, stateless client over a shared [`reqwest::Client`].
///
/// One attempt per call — retries are the caller's responsibility.
#[derive(Debug, Clone)]
pub struct VolumeClient {
    http: reqwest::Client,
}

impl Default for VolumeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeClient {
    /// Build a client sharing one connection pool across all calls.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client configuration is valid");
        Self { http }
    }

    /// Write `body` to `node`; returns the hex digest the volume assigned it.
    pub async fn write(&self, node: &str, body: Bytes) -> Result<String> {
        let resp = self
            .http
            .put(node)
            .body(body)
            .send()
            .await
            .context(RequestSnafu)?;

        if resp.status() != reqwest::StatusCode::CREATED {
            return UnexpectedStatusSnafu { status: resp.status() }.fail();
        }

        let digest = resp.text().await.context(RequestSnafu)?;
        let digest = digest.trim().to_string();
        if !is_hex_digest(&digest) {
            return BadDigestSnafu { body: digest }.fail();
        }
        Ok(digest)
    }

    /// Fetch the payload at `locator`. Returns `Ok(None)` if the volume
    /// reports the blob is absent.
    pub async fn read(&self, locator: &str) -> Result<Option<Bytes>> {
        let resp = self.http.get(locator).send().await.context(RequestSnafu)?;
        match resp.status() {
            reqwest::StatusCode::OK => Ok(Some(resp.bytes().await.context(RequestSnafu)?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => UnexpectedStatusSnafu { status }.fail(),
        }
    }

    /// Check whether `locator` exists on its volume.
    pub async fn head(&self, locator: &str) -> Result<Presence> {
        let resp = self.http.head(locator).send().await.context(RequestSnafu)?;
        match resp.status() {
            reqwest::StatusCode::OK => Ok(Presence::Present),
            reqwest::StatusCode::NOT_FOUND => Ok(Presence::Absent),
            status => UnexpectedStatusSnafu { status }.fail(),
        }
    }

    /// Idempotently delete `locator`.
    pub async fn delete(&self, locator: &str) -> Result<DeleteOutcome> {
        let resp = self.http.delete(locator).send().await.context(RequestSnafu)?;
        match resp.status() {
            reqwest::StatusCode::NO_CONTENT => Ok(DeleteOutcome::Deleted),
            reqwest::StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyAbsent),
            status => UnexpectedStatusSnafu { status }.fail(),
        }
    }

    /// List every digest currently stored on `node`. Used only by
    /// maintenance operations.
    pub async fn enumerate(&self, node: &str) -> Result<Vec<String>> {
        let url = format!("{}/_list", node.trim_end_matches('/'));
        let resp = self.http.get(&url).send().await.context(RequestSnafu)?;
        if resp.status() != reqwest::StatusCode::OK {
            warn!(node, status = %resp.status(), "volume listing request failed");
            return UnexpectedStatusSnafu { status: resp.status() }.fail();
        }
        let body = resp.bytes().await.context(RequestSnafu)?;
        serde_json::from_slice(&body).context(BadListingSnafu)
    }
}
