//! Offline maintenance passes that restore agreement between the three
//! sources of truth a running cluster can drift apart on: the metadata
//! index, the ring's desired placement, and what volumes actually hold.
//!
//! Each pass is read-mostly and safe to re-run; none of them retry failed
//! per-item operations, matching the coordinator's own no-retry policy —
//! a failed item is logged, counted, and skipped.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use std::collections::HashSet;

use bytes::Bytes;
use futures::future::join_all;
use index::Index;
use observability_deps::tracing::{error, info, warn};
use ring::Ring;
use snafu::{ResultExt, Snafu};
use volume_client::{locator, DeleteOutcome, Presence, VolumeClient};

/// Errors that abort a maintenance pass outright. Per-item failures (a
/// single volume unreachable, a single key under-replicated) are not
/// represented here; they are tallied in that pass's report instead.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The index itself could not be read.
    #[snafu(display("could not read index: {}", source))]
    Index { source: index::Error },
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared context a maintenance pass runs against: the index handle, the
/// ring built from the configured volume list, and the replication factor.
#[derive(Debug)]
pub struct Reconciler<'a> {
    index: &'a Index,
    ring: &'a Ring,
    volumes: Vec<String>,
    replicas: usize,
    client: VolumeClient,
}

/// Outcome of [`Reconciler::rebuild`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    /// Volumes scanned via their `/_list` endpoint.
    pub volumes_scanned: usize,
    /// Volumes that failed to respond and were skipped.
    pub volume_errors: usize,
    /// Locators newly recorded in the index.
    pub locators_added: usize,
}

/// Outcome of [`Reconciler::rebalance`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Keys inspected.
    pub keys_checked: usize,
    /// Locators newly written to under-replicated keys.
    pub locators_added: usize,
    /// Keys that could not be rebalanced (source fetch failed).
    pub errors: usize,
}

/// Outcome of [`Reconciler::verify`]. Read-only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    /// Keys inspected.
    pub keys_checked: usize,
    /// Under-replicated rows and missing replicas found, combined.
    pub errors: usize,
}

impl VerifyReport {
    /// Whether this pass found nothing wrong.
    pub fn passed(&self) -> bool {
        self.errors == 0
    }
}

/// Outcome of [`Reconciler::compact`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    /// Digests referenced by the index at the time of the scan.
    pub known_digests: usize,
    /// Orphaned volume files deleted.
    pub deleted: usize,
    /// Volumes or deletes that failed and were skipped.
    pub errors: usize,
}

impl<'a> Reconciler<'a> {
    /// Build a reconciler over `index`, replicating to `replicas` nodes
    /// selected from `ring`, which must already have `volumes` added to it.
    pub fn new(index: &'a Index, ring: &'a Ring, volumes: Vec<String>, replicas: usize) -> Self {
        Self {
            index,
            ring,
            volumes,
            replicas,
            client: VolumeClient::new(),
        }
    }

    /// Reconstruct index rows from volume inventories after index loss.
    ///
    /// Only hash-keyed rows can be recovered this way: a volume's `/_list`
    /// only ever returns digests, so a row created under a user-chosen key
    /// has no way back in. Idempotent.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();

        for volume in &self.volumes {
            info!(volume, "rebuild: scanning volume");
            let digests = match self.client.enumerate(volume).await {
                Ok(digests) => digests,
                Err(err) => {
                    warn!(volume, %err, "rebuild: failed to scan volume");
                    report.volume_errors += 1;
                    continue;
                }
            };
            report.volumes_scanned += 1;

            for digest in digests {
                let target = locator::build(volume, &digest);
                let mut locators = self.index.get(&digest).context(IndexSnafu)?.unwrap_or_default();
                if locators.iter().any(|l| l == &target) {
                    continue;
                }
                locators.push(target);
                self.index.put(&digest, &locators).context(IndexSnafu)?;
                report.locators_added += 1;
            }
        }

        info!(?report, "rebuild complete");
        Ok(report)
    }

    /// Ensure every key's row has at least one locator on each currently
    /// desired node. Additive only: stale replicas are left for [`Self::compact`]
    /// to reclaim, never removed here.
    pub async fn rebalance(&self) -> Result<RebalanceReport> {
        let mut report = RebalanceReport::default();

        for key in self.index.list_keys().context(IndexSnafu)? {
            report.keys_checked += 1;
            let Some(locators) = self.index.get(&key).context(IndexSnafu)? else {
                continue;
            };

            let desired = self.ring.select(&key, self.replicas);
            let present: HashSet<String> = locators.iter().filter_map(|l| locator::base_url(l)).collect();
            let missing: Vec<String> = desired.into_iter().filter(|node| !present.contains(node)).collect();
            if missing.is_empty() {
                continue;
            }

            let payload = match self.client.read(&locators[0]).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!(key, locator = %locators[0], "rebalance: source replica missing payload");
                    report.errors += 1;
                    continue;
                }
                Err(err) => {
                    warn!(key, %err, "rebalance: failed to fetch source payload");
                    report.errors += 1;
                    continue;
                }
            };

            let writes = missing.iter().map(|node| self.write_one(node, payload.clone()));
            let mut locators = locators;
            for outcome in join_all(writes).await {
                match outcome {
                    Ok(new_locator) => {
                        locators.push(new_locator);
                        report.locators_added += 1;
                    }
                    Err(err) => {
                        warn!(key, %err, "rebalance: write to missing replica failed");
                        report.errors += 1;
                    }
                }
            }

            self.index.put(&key, &locators).context(IndexSnafu)?;
        }

        info!(?report, "rebalance complete");
        Ok(report)
    }

    async fn write_one(&self, node: &str, payload: Bytes) -> volume_client::Result<String> {
        let digest = self.client.write(node, payload).await?;
        Ok(locator::build(node, &digest))
    }

    /// Read-only pass flagging under-replication and missing replicas.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for key in self.index.list_keys().context(IndexSnafu)? {
            report.keys_checked += 1;
            let locators = self.index.get(&key).context(IndexSnafu)?.unwrap_or_default();

            if locators.len() < self.replicas {
                warn!(key, have = locators.len(), want = self.replicas, "under-replicated");
                report.errors += 1;
            }

            for locator in &locators {
                match self.client.head(locator).await {
                    Ok(Presence::Present) => {}
                    Ok(Presence::Absent) => {
                        warn!(key, locator, "missing replica");
                        report.errors += 1;
                    }
                    Err(err) => {
                        error!(key, locator, %err, "verify: head check failed");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(?report, "verify complete");
        Ok(report)
    }

    /// Delete volume files not referenced by any index row.
    ///
    /// Safe only when no writes are in flight: a blob written but not yet
    /// committed to the index looks orphaned and may be deleted.
    pub async fn compact(&self) -> Result<CompactReport> {
        let mut report = CompactReport::default();
        let mut known = HashSet::new();

        for key in self.index.list_keys().context(IndexSnafu)? {
            if let Some(locators) = self.index.get(&key).context(IndexSnafu)? {
                known.extend(locators.iter().filter_map(|l| locator::digest(l)).map(str::to_string));
            }
        }
        report.known_digests = known.len();

        for volume in &self.volumes {
            let digests = match self.client.enumerate(volume).await {
                Ok(digests) => digests,
                Err(err) => {
                    warn!(volume, %err, "compact: failed to scan volume");
                    report.errors += 1;
                    continue;
                }
            };

            for digest in digests {
                if known.contains(&digest) {
                    continue;
                }
                let target = locator::build(volume, &digest);
                info!(locator = %target, "compact: deleting orphan");
                match self.client.delete(&target).await {
                    Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::AlreadyAbsent) => {
                        report.deleted += 1;
                    }
                    Err(err) => {
                        warn!(locator = %target, %err, "compact: delete failed");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(?report, "compaction complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn write(client: &VolumeClient, base: &str, body: &'static [u8]) -> String {
        let digest = client.write(base, Bytes::from_static(body)).await.unwrap();
        locator::build(base, &digest)
    }

    #[tokio::test]
    async fn rebuild_recovers_hash_keyed_rows_from_volume_inventory() {
        let volume = test_helpers::spawn_volume().await;
        let client = VolumeClient::new();
        let loc = write(&client, &volume.base_url(), b"payload").await;
        let digest = locator::digest(&loc).unwrap().to_string();

        let index = Index::open_in_memory().unwrap();
        let ring = Ring::new(ring::DEFAULT_VNODES);
        ring.add(volume.base_url());

        let reconciler = Reconciler::new(&index, &ring, vec![volume.base_url()], 1);
        let report = reconciler.rebuild().await.unwrap();

        assert_eq!(report.locators_added, 1);
        assert_eq!(index.get(&digest).unwrap(), Some(vec![loc.clone()]));

        // Re-running is a no-op.
        let second = reconciler.rebuild().await.unwrap();
        assert_eq!(second.locators_added, 0);
        assert_eq!(index.get(&digest).unwrap(), Some(vec![loc]));
    }

    #[tokio::test]
    async fn rebalance_fills_in_missing_replica() {
        let v1 = test_helpers::spawn_volume().await;
        let v2 = test_helpers::spawn_volume().await;
        let client = VolumeClient::new();
        let loc = write(&client, &v1.base_url(), b"hello").await;

        let index = Index::open_in_memory().unwrap();
        index.put("mykey", &[loc]).unwrap();

        let ring = Ring::new(ring::DEFAULT_VNODES);
        ring.add(v1.base_url());
        ring.add(v2.base_url());

        let reconciler = Reconciler::new(&index, &ring, vec![v1.base_url(), v2.base_url()], 2);
        let report = reconciler.rebalance().await.unwrap();

        assert_eq!(report.errors, 0);
        let locators = index.get("mykey").unwrap().unwrap();
        assert_eq!(locators.len(), 2);
        let bases: HashSet<String> = locators.iter().filter_map(|l| locator::base_url(l)).collect();
        assert!(bases.contains(&v1.base_url()));
        assert!(bases.contains(&v2.base_url()));
    }

    #[tokio::test]
    async fn verify_flags_under_replication_and_missing_replicas() {
        let volume = test_helpers::spawn_volume().await;
        let client = VolumeClient::new();
        let present = write(&client, &volume.base_url(), b"present").await;
        let missing = locator::build(&volume.base_url(), &"a".repeat(64));

        let index = Index::open_in_memory().unwrap();
        index.put("k1", &[present]).unwrap();
        index.put("k2", &[missing]).unwrap();

        let ring = Ring::new(ring::DEFAULT_VNODES);
        ring.add(volume.base_url());

        let reconciler = Reconciler::new(&index, &ring, vec![volume.base_url()], 2);
        let report = reconciler.verify().await.unwrap();

        assert!(!report.passed());
        // k1 under-replicated (1/2), k2 under-replicated (1/2) and missing on disk.
        assert_eq!(report.errors, 3);
    }

    #[tokio::test]
    async fn compact_deletes_orphans_but_keeps_known_digests() {
        let volume = test_helpers::spawn_volume().await;
        let client = VolumeClient::new();
        let kept = write(&client, &volume.base_url(), b"kept").await;
        let kept_digest = locator::digest(&kept).unwrap().to_string();
        let _orphan = write(&client, &volume.base_url(), b"orphan").await;

        let index = Index::open_in_memory().unwrap();
        index.put(&kept_digest, &[kept]).unwrap();

        let ring = Ring::new(ring::DEFAULT_VNODES);
        ring.add(volume.base_url());

        let reconciler = Reconciler::new(&index, &ring, vec![volume.base_url()], 1);
        let report = reconciler.compact().await.unwrap();

        assert_eq!(report.errors, 0);
        assert_eq!(report.deleted, 1);

        let remaining = client.enumerate(&volume.base_url()).await.unwrap();
        assert_eq!(remaining, vec![kept_digest]);
    }
}
