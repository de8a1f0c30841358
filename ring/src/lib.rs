//! Consistent-hash ring used to pick the set of volume nodes a key replicates to.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::clone_on_ref_ptr
)]

use std::hash::{Hash, Hasher};

use observability_deps::tracing::debug;
use parking_lot::RwLock;
use siphasher::sip::SipHasher13;

/// Default number of virtual nodes (ring positions) a physical node owns.
///
/// This is independent of the replication factor `N` callers pass to
/// [`Ring::select`] — conflating the two means small clusters distribute keys
/// unevenly, which is why this crate keeps them as separate knobs.
pub const DEFAULT_VNODES: usize = 128;

/// Fixed SipHash key so ring positions are reproducible across processes and
/// restarts. The ring's placement is only useful if it is bit-for-bit
/// deterministic, so this must never be randomized.
const HASH_KEYS: (u64, u64) = (0x5f3759df_a5a5a5a5, 0x2545f491_4f6cdd1d);

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<String>,
    /// position -> index into `nodes`
    positions: Vec<(u64, usize)>,
}

impl Inner {
    fn rebuild_from(&mut self, vnodes: usize) {
        self.positions.clear();
        for (idx, node) in self.nodes.iter().enumerate() {
            for i in 0..vnodes {
                let pos = hash_bytes(format!("{node}{i}").as_bytes());
                self.positions.push((pos, idx));
            }
        }
        self.positions.sort_unstable_by_key(|(pos, _)| *pos);
    }
}

/// A consistent-hash ring mapping keys to an ordered list of distinct nodes.
///
/// Mutations (`add`) are serialized behind a write lock; lookups (`select`)
/// only take a read lock, so many callers can resolve replica sets
/// concurrently without blocking each other.
#[derive(Debug)]
pub struct Ring {
    vnodes: usize,
    inner: RwLock<Inner>,
}

impl Ring {
    /// Build an empty ring with the given number of virtual nodes per
    /// physical node. Use [`DEFAULT_VNODES`] unless you have a reason not to.
    pub fn new(vnodes: usize) -> Self {
        Self {
            vnodes,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Insert a node, emitting `vnodes` ring positions for it.
    ///
    /// Inserting the same node URL twice is undefined — callers are
    /// responsible for not doing that.
    pub fn add(&self, node: impl Into<String>) {
        let node = node.into();
        let mut inner = self.inner.write();
        debug!(%node, vnodes = self.vnodes, "adding node to ring");
        inner.nodes.push(node);
        inner.rebuild_from(self.vnodes);
    }

    /// Return up to `min(n, node_count)` distinct nodes for `key`, in ring
    /// order starting from the first position at or after `hash(key)`.
    pub fn select(&self, key: &str, n: usize) -> Vec<String> {
        let inner = self.inner.read();
        if inner.nodes.is_empty() || n == 0 {
            return Vec::new();
        }

        let target = hash_bytes(key.as_bytes());
        let start = inner
            .positions
            .partition_point(|(pos, _)| *pos < target);

        let want = n.min(inner.nodes.len());
        let mut chosen = Vec::with_capacity(want);
        let mut seen = vec![false; inner.nodes.len()];

        for offset in 0..inner.positions.len() {
            let i = (start + offset) % inner.positions.len();
            let (_, node_idx) = inner.positions[i];
            if !seen[node_idx] {
                seen[node_idx] = true;
                chosen.push(inner.nodes[node_idx].clone());
                if chosen.len() == want {
                    break;
                }
            }
        }

        chosen
    }

    /// Number of physical nodes currently in the ring.
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn empty_ring_selects_nothing() {
        let ring = Ring::new(DEFAULT_VNODES);
        assert_eq!(ring.select("any", 3), Vec::<String>::new());
    }

    #[test]
    fn select_returns_min_n_and_node_count_distinct_nodes() {
        let ring = Ring::new(DEFAULT_VNODES);
        ring.add("http://v1");
        ring.add("http://v2");
        ring.add("http://v3");

        let chosen = ring.select("hello", 2);
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen.iter().collect::<HashSet<_>>().len(), 2);

        let all = ring.select("hello", 10);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn select_is_deterministic() {
        let ring = Ring::new(DEFAULT_VNODES);
        ring.add("http://v1");
        ring.add("http://v2");
        ring.add("http://v3");

        let first = ring.select("some-key", 3);
        let second = ring.select("some-key", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn adding_a_node_moves_a_small_fraction_of_keys() {
        let ring = Ring::new(DEFAULT_VNODES);
        ring.add("http://v1");
        ring.add("http://v2");
        ring.add("http://v3");

        let keys: Vec<String> = (0..2000).map(|i| format!("key-{i}")).collect();
        let before: Vec<String> = keys.iter().map(|k| ring.select(k, 1)[0].clone()).collect();

        ring.add("http://v4");
        let after: Vec<String> = keys.iter().map(|k| ring.select(k, 1)[0].clone()).collect();

        let moved = before.iter().zip(&after).filter(|(a, b)| a != b).count();
        let fraction = moved as f64 / keys.len() as f64;
        // Expect close to 1/4 of keys to move to the new node; allow generous
        // slack since this is a probabilistic bound, not an exact one.
        assert!(fraction < 0.45, "moved fraction too high: {fraction}");
    }

    #[test]
    fn select_with_one_node_returns_that_node() {
        let ring = Ring::new(DEFAULT_VNODES);
        ring.add("http://only");
        assert_eq!(ring.select("k", 5), vec!["http://only".to_string()]);
    }
}
