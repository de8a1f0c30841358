//! Metadata index: a durable `key -> [replica locator]` mapping, backed by a
//! single SQLite file. Each [`Index::put`]/[`Index::delete`] is one SQL
//! statement, which is where the row-level atomicity this crate promises
//! actually comes from.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use std::path::Path;

use observability_deps::tracing::debug;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use snafu::{ResultExt, Snafu};

/// Errors returned by [`Index`] operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The underlying SQLite database could not be opened.
    #[snafu(display("could not open index database at {}: {}", path.display(), source))]
    Open {
        /// Path that could not be opened.
        path: std::path::PathBuf,
        source: rusqlite::Error,
    },

    /// A SQL statement failed.
    #[snafu(display("index query failed: {}", source))]
    Query { source: rusqlite::Error },
}

/// Result alias for [`Index`] operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Durable key -> ordered replica-locator-list store.
#[derive(Debug)]
pub struct Index {
    conn: Mutex<Connection>,
}

impl Index {
    /// Open (creating if absent) the SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).context(OpenSnafu { path })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                locators TEXT NOT NULL
            )",
            [],
        )
        .context(QuerySnafu)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context(OpenSnafu {
            path: std::path::PathBuf::from(":memory:"),
        })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                locators TEXT NOT NULL
            )",
            [],
        )
        .context(QuerySnafu)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Atomically replace (upserting) the row for `key`.
    ///
    /// `locators` must be non-empty; callers never need to store an empty
    /// locator list (absence of a row already means that).
    pub fn put(&self, key: &str, locators: &[String]) -> Result<()> {
        debug_assert!(!locators.is_empty(), "put with empty locator list");
        let joined = locators.join(",");
        self.conn
            .lock()
            .execute(
                "INSERT INTO blobs (key, locators) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET locators = excluded.locators",
                params![key, joined],
            )
            .context(QuerySnafu)?;
        debug!(key, locators = %joined, "index row committed");
        Ok(())
    }

    /// Return the locator list for `key`, or `None` if there is no row.
    pub fn get(&self, key: &str) -> Result<Option<Vec<String>>> {
        let row: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT locators FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context(QuerySnafu)?;
        Ok(row.map(|joined| joined.split(',').map(str::to_string).collect()))
    }

    /// Snapshot all keys currently present. Ordering is unspecified.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM blobs").context(QuerySnafu)?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .context(QuerySnafu)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context(QuerySnafu)?;
        Ok(keys)
    }

    /// Idempotently remove the row for `key`, if present.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM blobs WHERE key = ?1", params![key])
            .context(QuerySnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_absent_key_returns_none() {
        let index = Index::open_in_memory().unwrap();
        assert_eq!(index.get("missing").unwrap(), None);
    }

    #[test]
    fn put_then_get_round_trips() {
        let index = Index::open_in_memory().unwrap();
        let locators = vec!["http://v1/ab/cd/abcd".to_string(), "http://v2/ab/cd/abcd".to_string()];
        index.put("k", &locators).unwrap();
        assert_eq!(index.get("k").unwrap(), Some(locators));
    }

    #[test]
    fn put_is_an_upsert() {
        let index = Index::open_in_memory().unwrap();
        index.put("k", &["http://v1/a/b/h".to_string()]).unwrap();
        index.put("k", &["http://v2/a/b/h".to_string()]).unwrap();
        assert_eq!(index.get("k").unwrap(), Some(vec!["http://v2/a/b/h".to_string()]));
    }

    #[test]
    fn delete_is_idempotent() {
        let index = Index::open_in_memory().unwrap();
        index.delete("missing").unwrap();
        index.put("k", &["http://v1/a/b/h".to_string()]).unwrap();
        index.delete("k").unwrap();
        index.delete("k").unwrap();
        assert_eq!(index.get("k").unwrap(), None);
    }

    #[test]
    fn list_keys_snapshots_all_rows() {
        let index = Index::open_in_memory().unwrap();
        index.put("a", &["http://v1/a/b/h".to_string()]).unwrap();
        index.put("b", &["http://v1/a/b/h2".to_string()]).unwrap();
        let mut keys = index.list_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn open_creates_file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        {
            let index = Index::open(&path).unwrap();
            index.put("k", &["http://v1/a/b/h".to_string()]).unwrap();
        }
        let reopened = Index::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some(vec!["http://v1/a/b/h".to_string()]));
    }
}
