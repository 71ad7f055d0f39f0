//! SQLite-backed durable tier.
//!
//! All namespaces share one `cache_entries` table inside a single database
//! file. Payloads are encoded with `bincode`; an absent version is stored as
//! `0`.

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bincode::Options;
use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, Error as SqliteError, params};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::{DurableTier, DurableTierError};
use crate::{EntityKind, Version};

const CREATE_SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    payload BLOB NOT NULL,
    written_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, entity_id, version)
)";

const CREATE_AGE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS cache_entries_written_at ON cache_entries (namespace, written_at)";

const UPSERT_SQL: &str = "INSERT INTO cache_entries (namespace, entity_id, version, payload, written_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (namespace, entity_id, version)
    DO UPDATE SET payload = excluded.payload, written_at = excluded.written_at";

const LOAD_SQL: &str =
    "SELECT payload FROM cache_entries WHERE namespace = ?1 AND entity_id = ?2 ORDER BY version";

const PURGE_AGE_SQL: &str = "DELETE FROM cache_entries WHERE namespace = ?1 AND written_at < ?2";

const COUNT_SQL: &str = "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?1";

const PURGE_EXCESS_SQL: &str = "DELETE FROM cache_entries WHERE rowid IN (
    SELECT rowid FROM cache_entries WHERE namespace = ?1 LIMIT ?2
)";

/// Errors raised while opening the durable cache database.
#[derive(Debug, Error)]
pub enum SqliteCacheError {
    /// Creating the parent directory failed.
    #[error("failed to create parent directory for {path}")]
    CreateDirectory {
        /// Database path whose parent could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite cache at {path}")]
    Open {
        /// Database location.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the cache schema failed.
    #[error("failed to create cache_entries table")]
    CreateSchema {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// Shared connection to the durable cache database.
#[derive(Clone)]
pub struct SqliteCacheDb {
    connection: Arc<Mutex<Connection>>,
    path: Option<Utf8PathBuf>,
}

impl fmt::Debug for SqliteCacheDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteCacheDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteCacheDb {
    /// Open (creating if needed) the cache database at `path`.
    ///
    /// # Errors
    /// Returns [`SqliteCacheError`] when the parent directory cannot be
    /// created, the file cannot be opened, or the schema cannot be created.
    pub fn open(path: &Utf8Path) -> Result<Self, SqliteCacheError> {
        lineage_fs::ensure_parent_dir(path).map_err(|source| {
            SqliteCacheError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let connection =
            Connection::open(path.as_std_path()).map_err(|source| SqliteCacheError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::initialise(connection, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`SqliteCacheError`] when SQLite refuses the connection.
    pub fn open_in_memory() -> Result<Self, SqliteCacheError> {
        let connection = Connection::open_in_memory().map_err(|source| SqliteCacheError::Open {
            path: Utf8PathBuf::from(":memory:"),
            source,
        })?;
        Self::initialise(connection, None)
    }

    fn initialise(
        mut connection: Connection,
        path: Option<Utf8PathBuf>,
    ) -> Result<Self, SqliteCacheError> {
        let transaction = connection
            .transaction()
            .map_err(|source| SqliteCacheError::CreateSchema { source })?;
        transaction
            .execute(CREATE_SCHEMA_SQL, [])
            .and_then(|_| transaction.execute(CREATE_AGE_INDEX_SQL, []))
            .map_err(|source| SqliteCacheError::CreateSchema { source })?;
        transaction
            .commit()
            .map_err(|source| SqliteCacheError::CreateSchema { source })?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            path,
        })
    }

    /// Durable tier storing values of type `T` under `kind`'s namespace.
    #[must_use]
    pub fn tier<T>(&self, kind: EntityKind) -> SqliteDurableTier<T> {
        SqliteDurableTier {
            db: self.clone(),
            namespace: kind.as_str(),
            value: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One namespace of a [`SqliteCacheDb`].
pub struct SqliteDurableTier<T> {
    db: SqliteCacheDb,
    namespace: &'static str,
    value: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for SqliteDurableTier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDurableTier")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<T> SqliteDurableTier<T> {
    fn backend(&self, operation: &'static str, source: SqliteError) -> DurableTierError {
        DurableTierError::Backend {
            namespace: self.namespace,
            operation,
            source: Box::new(source),
        }
    }

    fn codec(&self, id: i64, source: bincode::Error) -> DurableTierError {
        DurableTierError::Codec {
            namespace: self.namespace,
            id,
            source,
        }
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
}

fn unix_seconds(moment: SystemTime) -> i64 {
    moment
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

impl<T> DurableTier<T> for SqliteDurableTier<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, id: i64) -> Result<Vec<T>, DurableTierError> {
        let connection = self.db.lock();
        let mut statement = connection
            .prepare_cached(LOAD_SQL)
            .map_err(|source| self.backend("load", source))?;
        let payloads = statement
            .query_map(params![self.namespace, id], |row| row.get::<_, Vec<u8>>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|source| self.backend("load", source))?;
        payloads
            .iter()
            .map(|payload| {
                bincode_options()
                    .deserialize(payload)
                    .map_err(|source| self.codec(id, source))
            })
            .collect()
    }

    fn store(&self, id: i64, version: Option<Version>, value: &T) -> Result<(), DurableTierError> {
        let payload = bincode_options()
            .serialize(value)
            .map_err(|source| self.codec(id, source))?;
        let version = version.map_or(0, |version| {
            i64::try_from(version.get()).unwrap_or(i64::MAX)
        });
        let connection = self.db.lock();
        connection
            .execute(
                UPSERT_SQL,
                params![
                    self.namespace,
                    id,
                    version,
                    payload,
                    unix_seconds(SystemTime::now())
                ],
            )
            .map(|_| ())
            .map_err(|source| self.backend("store", source))
    }

    fn purge(&self, max_age: Duration, max_entries: usize) -> Result<usize, DurableTierError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .map_or(0, unix_seconds);
        let connection = self.db.lock();
        let expired = connection
            .execute(PURGE_AGE_SQL, params![self.namespace, cutoff])
            .map_err(|source| self.backend("purge", source))?;
        let remaining: i64 = connection
            .query_row(COUNT_SQL, params![self.namespace], |row| row.get(0))
            .map_err(|source| self.backend("purge", source))?;
        let limit = i64::try_from(max_entries).unwrap_or(i64::MAX);
        let excess = remaining.saturating_sub(limit);
        if excess <= 0 {
            return Ok(expired);
        }
        let trimmed = connection
            .execute(PURGE_EXCESS_SQL, params![self.namespace, excess])
            .map_err(|source| self.backend("purge", source))?;
        Ok(expired + trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Changeset, ChangesetId, Coordinate, ElementMeta, Node, NodeId, Versioned};
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    fn node(id: i64, version: u64) -> Node {
        let timestamp = Utc
            .timestamp_opt(1_000, 0)
            .single()
            .expect("valid timestamp");
        let meta = ElementMeta::new(
            Version::new(version).expect("valid version"),
            ChangesetId::new(1),
            timestamp,
        );
        Node::new(NodeId::new(id), Coordinate::new(1.5, -2.25), meta)
    }

    #[fixture]
    fn db() -> SqliteCacheDb {
        SqliteCacheDb::open_in_memory().expect("open in-memory cache")
    }

    #[rstest]
    fn stored_versions_load_in_order(db: SqliteCacheDb) {
        let tier = db.tier::<Node>(EntityKind::Node);
        for version in [2, 1] {
            let value = node(5, version);
            tier.store(5, Some(value.version()), &value)
                .expect("store node");
        }
        let loaded = tier.load(5).expect("load node");
        let versions: Vec<u64> = loaded.iter().map(|n| n.version().get()).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(loaded.first(), Some(&node(5, 1)));
    }

    #[rstest]
    fn namespaces_are_isolated(db: SqliteCacheDb) {
        let nodes = db.tier::<Node>(EntityKind::Node);
        let other = db.tier::<Node>(EntityKind::Way);
        nodes
            .store(5, Some(Version::FIRST), &node(5, 1))
            .expect("store node");
        assert!(other.load(5).expect("load").is_empty());
    }

    #[rstest]
    fn rewriting_a_version_replaces_it(db: SqliteCacheDb) {
        let tier = db.tier::<Node>(EntityKind::Node);
        let first = node(5, 1);
        tier.store(5, Some(Version::FIRST), &first)
            .expect("store node");
        let current = first.with_current(true);
        tier.store(5, Some(Version::FIRST), &current)
            .expect("store node");
        assert_eq!(tier.load(5).expect("load"), vec![current]);
    }

    #[rstest]
    fn purge_trims_excess_entries(db: SqliteCacheDb) {
        let tier = db.tier::<Node>(EntityKind::Node);
        for id in 1..=5 {
            tier.store(id, Some(Version::FIRST), &node(id, 1))
                .expect("store node");
        }
        let removed = tier
            .purge(Duration::from_secs(3_600), 2)
            .expect("purge entries");
        assert_eq!(removed, 3);
        let left: usize = (1..=5)
            .map(|id| tier.load(id).expect("load").len())
            .sum();
        assert_eq!(left, 2);
    }

    #[rstest]
    fn purge_drops_expired_entries(db: SqliteCacheDb) {
        let tier = db.tier::<Node>(EntityKind::Node);
        tier.store(1, Some(Version::FIRST), &node(1, 1))
            .expect("store node");
        {
            let connection = db.lock();
            connection
                .execute("UPDATE cache_entries SET written_at = 0", [])
                .expect("age entries");
        }
        let removed = tier
            .purge(Duration::from_secs(60), 100)
            .expect("purge entries");
        assert_eq!(removed, 1);
    }

    #[rstest]
    fn changesets_round_trip_through_the_tier(db: SqliteCacheDb) {
        let tier = db.tier::<Changeset>(EntityKind::Changeset);
        let changeset = Changeset {
            id: ChangesetId::new(9),
            author: Some("mapper".to_owned()),
            created_at: Utc.timestamp_opt(1_000, 0).single().expect("valid timestamp"),
            closed_at: Utc.timestamp_opt(2_000, 0).single(),
            tags: [("comment".to_owned(), "realign footway".to_owned())]
                .into_iter()
                .collect(),
        };
        tier.store(9, None, &changeset).expect("store changeset");
        assert_eq!(tier.load(9).expect("load changeset"), vec![changeset]);
        assert!(tier.load(10).expect("load changeset").is_empty());
    }

    #[rstest]
    fn database_file_persists_entries() {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/cache.db"))
            .expect("utf-8 temp path");
        {
            let db = SqliteCacheDb::open(&path).expect("open cache");
            db.tier::<Node>(EntityKind::Node)
                .store(9, Some(Version::FIRST), &node(9, 1))
                .expect("store node");
        }
        let reopened = SqliteCacheDb::open(&path).expect("reopen cache");
        let loaded = reopened
            .tier::<Node>(EntityKind::Node)
            .load(9)
            .expect("load node");
        assert_eq!(loaded.len(), 1);
    }
}
