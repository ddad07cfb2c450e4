//! The SQLite storage backend.
//!
//! Entries live in a `store` table of bincode-encoded key/value blobs plus a
//! nullable expiry instant. The connection runs in WAL journal mode with
//! `synchronous=FULL`, so acknowledged writes survive a crash of the hosting
//! process.
//!
//! Construction never panics and never returns an error: a backend whose
//! setup failed stays in a degenerate state where [`SqliteBackend::init_failed`]
//! reports `true` and every operation fails with `backend_failure`.

use super::{backend_failure, Backend, BackendOptions, Snapshot};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use skein_core::{Data, DataType, Error, ErrorKind, Result, Timestamp};
use std::time::Duration;
use tracing::warn;

/// Schema version written to the `meta` table.
const SCHEMA_VERSION: i64 = 1;

/// Busy timeout for concurrent openers of the same database file.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Persistent key-value engine backed by SQLite.
pub struct SqliteBackend {
    conn: Option<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database named by the `path` option.
    pub fn new(options: &BackendOptions) -> Self {
        match Self::open(options) {
            Ok(conn) => Self { conn: Some(conn) },
            Err(error) => {
                warn!(%error, "sqlite backend initialization failed");
                Self { conn: None }
            }
        }
    }

    /// Whether construction failed, leaving the backend degenerate.
    pub fn init_failed(&self) -> bool {
        self.conn.is_none()
    }

    fn open(options: &BackendOptions) -> Result<Connection> {
        let path = options.get_str("path").ok_or_else(|| {
            Error::with_message(ErrorKind::CannotOpenFile, "sqlite backend requires a `path` option")
        })?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| {
            Error::with_message(ErrorKind::CannotOpenFile, format!("cannot open {path}: {e}"))
        })?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend_failure)?;
        // journal_mode is a query-shaped pragma: it reports the resulting mode.
        conn.query_row("PRAGMA journal_mode = wal", [], |_| Ok(()))
            .map_err(backend_failure)?;
        conn.execute_batch("PRAGMA synchronous = FULL")
            .map_err(backend_failure)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS store (
                 key BLOB PRIMARY KEY,
                 value BLOB NOT NULL,
                 expiry INTEGER
             );",
        )
        .map_err(backend_failure)?;

        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_failure)?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(backend_failure)?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::with_message(
                    ErrorKind::BackendFailure,
                    format!("unsupported schema version {v} (expected {SCHEMA_VERSION})"),
                ));
            }
        }
        Ok(conn)
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| backend_failure("sqlite backend not initialized"))
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| backend_failure("sqlite backend not initialized"))
    }
}

fn encode(value: &Data) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(backend_failure)
}

fn decode(blob: &[u8]) -> Result<Data> {
    bincode::deserialize(blob).map_err(backend_failure)
}

fn upsert(conn: &Connection, key: &[u8], value: &[u8], expiry: Option<i64>) -> Result<()> {
    conn.execute(
        "INSERT INTO store (key, value, expiry) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expiry = excluded.expiry",
        params![key, value, expiry],
    )
    .map_err(backend_failure)?;
    Ok(())
}

impl Backend for SqliteBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<()> {
        let key_blob = encode(&key)?;
        let value_blob = encode(&value)?;
        upsert(self.conn()?, &key_blob, &value_blob, expiry.map(Timestamp::nanos))
    }

    fn add(
        &mut self,
        key: &Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> Result<()> {
        let key_blob = encode(key)?;
        let tx = self.conn_mut()?.transaction().map_err(backend_failure)?;

        let current: Option<(Vec<u8>, Option<i64>)> = tx
            .query_row(
                "SELECT value, expiry FROM store WHERE key = ?1",
                params![key_blob],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(backend_failure)?;

        let (mut target, existing_expiry) = match current {
            Some((blob, stored)) => (decode(&blob)?, stored),
            None => (init_type.zero(), None),
        };
        target.add(value)?;

        let effective = expiry.map(Timestamp::nanos).or(existing_expiry);
        upsert(&tx, &key_blob, &encode(&target)?, effective)?;
        tx.commit().map_err(backend_failure)
    }

    fn subtract(&mut self, key: &Data, value: &Data, expiry: Option<Timestamp>) -> Result<()> {
        let key_blob = encode(key)?;
        let tx = self.conn_mut()?.transaction().map_err(backend_failure)?;

        let current: Option<(Vec<u8>, Option<i64>)> = tx
            .query_row(
                "SELECT value, expiry FROM store WHERE key = ?1",
                params![key_blob],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(backend_failure)?;

        let (blob, existing_expiry) =
            current.ok_or_else(|| Error::new(ErrorKind::NoSuchKey))?;
        let mut target = decode(&blob)?;
        target.subtract(value)?;

        let effective = expiry.map(Timestamp::nanos).or(existing_expiry);
        upsert(&tx, &key_blob, &encode(&target)?, effective)?;
        tx.commit().map_err(backend_failure)
    }

    fn erase(&mut self, key: &Data) -> Result<()> {
        let key_blob = encode(key)?;
        self.conn()?
            .execute("DELETE FROM store WHERE key = ?1", params![key_blob])
            .map_err(backend_failure)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM store", [])
            .map_err(backend_failure)?;
        Ok(())
    }

    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool> {
        let key_blob = encode(key)?;
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM store WHERE key = ?1 AND expiry IS NOT NULL AND expiry <= ?2",
                params![key_blob, now.nanos()],
            )
            .map_err(backend_failure)?;
        Ok(removed > 0)
    }

    fn get(&self, key: &Data) -> Result<Data> {
        let key_blob = encode(key)?;
        let blob: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT value FROM store WHERE key = ?1",
                params![key_blob],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_failure)?;
        match blob {
            Some(blob) => decode(&blob),
            None => Err(Error::new(ErrorKind::NoSuchKey)),
        }
    }

    fn exists(&self, key: &Data) -> Result<bool> {
        let key_blob = encode(key)?;
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM store WHERE key = ?1",
                params![key_blob],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_failure)?;
        Ok(found.is_some())
    }

    fn size(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM store", [], |row| row.get(0))
            .map_err(backend_failure)?;
        Ok(count as u64)
    }

    fn keys(&self) -> Result<Data> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM store")
            .map_err(backend_failure)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(backend_failure)?;
        let mut keys = std::collections::BTreeSet::new();
        for blob in rows {
            keys.insert(decode(&blob.map_err(backend_failure)?)?);
        }
        Ok(Data::Set(keys))
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value, expiry FROM store")
            .map_err(backend_failure)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })
            .map_err(backend_failure)?;

        let mut snapshot = Snapshot::default();
        for row in rows {
            let (key_blob, value_blob, expiry) = row.map_err(backend_failure)?;
            let key = decode(&key_blob)?;
            snapshot.entries.push((key.clone(), decode(&value_blob)?));
            if let Some(nanos) = expiry {
                snapshot.expiries.push((key, Timestamp::from_nanos(nanos)));
            }
        }
        Ok(snapshot)
    }

    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, expiry FROM store WHERE expiry IS NOT NULL ORDER BY expiry")
            .map_err(backend_failure)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(backend_failure)?;

        let mut out = Vec::new();
        for row in rows {
            let (key_blob, nanos) = row.map_err(backend_failure)?;
            out.push((decode(&key_blob)?, Timestamp::from_nanos(nanos)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::Timespan;

    fn temp_options(dir: &tempfile::TempDir) -> BackendOptions {
        let path = dir.path().join("store.db");
        BackendOptions::new().with("path", path.to_string_lossy().into_owned())
    }

    #[test]
    fn put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let options = temp_options(&dir);

        {
            let mut backend = SqliteBackend::new(&options);
            assert!(!backend.init_failed());
            backend
                .put(Data::from("a"), Data::from(1i64), None)
                .unwrap();
        }

        let backend = SqliteBackend::new(&options);
        assert_eq!(backend.get(&Data::from("a")).unwrap(), Data::from(1i64));
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn structured_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SqliteBackend::new(&temp_options(&dir));

        let value = Data::Vector(vec![
            Data::from("x"),
            Data::Count(3),
            Data::Set([Data::from(1i64), Data::from(2i64)].into_iter().collect()),
        ]);
        backend.put(Data::from("composite"), value.clone(), None).unwrap();
        assert_eq!(backend.get(&Data::from("composite")).unwrap(), value);
    }

    #[test]
    fn add_and_subtract_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SqliteBackend::new(&temp_options(&dir));

        backend
            .add(&Data::from("n"), Data::Count(5), DataType::Count, None)
            .unwrap();
        backend
            .add(&Data::from("n"), Data::Count(2), DataType::Count, None)
            .unwrap();
        backend
            .subtract(&Data::from("n"), &Data::Count(3), None)
            .unwrap();
        assert_eq!(backend.get(&Data::from("n")).unwrap(), Data::Count(4));

        assert_eq!(
            backend
                .subtract(&Data::from("ghost"), &Data::Count(1), None)
                .unwrap_err()
                .kind(),
            ErrorKind::NoSuchKey
        );
    }

    #[test]
    fn expiry_is_persisted_and_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let options = temp_options(&dir);
        let expiry = Timestamp::EPOCH + Timespan::from_secs(5);

        {
            let mut backend = SqliteBackend::new(&options);
            backend
                .put(Data::from("t"), Data::from("x"), Some(expiry))
                .unwrap();
        }

        let mut backend = SqliteBackend::new(&options);
        assert_eq!(backend.expiries().unwrap(), vec![(Data::from("t"), expiry)]);

        assert!(!backend
            .expire(&Data::from("t"), Timestamp::EPOCH + Timespan::from_secs(4))
            .unwrap());
        assert!(backend
            .expire(&Data::from("t"), Timestamp::EPOCH + Timespan::from_secs(5))
            .unwrap());
        assert!(!backend.exists(&Data::from("t")).unwrap());
    }

    #[test]
    fn add_preserves_expiry_unless_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SqliteBackend::new(&temp_options(&dir));
        let first = Timestamp::from_nanos(100);
        let second = Timestamp::from_nanos(500);

        backend
            .add(&Data::from("n"), Data::Count(1), DataType::Count, Some(first))
            .unwrap();
        backend
            .add(&Data::from("n"), Data::Count(1), DataType::Count, None)
            .unwrap();
        assert_eq!(backend.expiries().unwrap(), vec![(Data::from("n"), first)]);

        backend
            .add(&Data::from("n"), Data::Count(1), DataType::Count, Some(second))
            .unwrap();
        assert_eq!(backend.expiries().unwrap(), vec![(Data::from("n"), second)]);
    }

    #[test]
    fn missing_path_option_degenerates() {
        let mut backend = SqliteBackend::new(&BackendOptions::new());
        assert!(backend.init_failed());
        assert_eq!(
            backend
                .put(Data::from("a"), Data::from(1i64), None)
                .unwrap_err()
                .kind(),
            ErrorKind::BackendFailure
        );
        assert_eq!(
            backend.get(&Data::from("a")).unwrap_err().kind(),
            ErrorKind::BackendFailure
        );
    }

    #[test]
    fn unopenable_path_degenerates() {
        let options = BackendOptions::new()
            .with("path", "/nonexistent-skein-dir/deeper/store.db");
        let backend = SqliteBackend::new(&options);
        assert!(backend.init_failed());
        assert_eq!(
            backend.size().unwrap_err().kind(),
            ErrorKind::BackendFailure
        );
    }

    #[test]
    fn erase_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SqliteBackend::new(&temp_options(&dir));

        backend.put(Data::from("a"), Data::from(1i64), None).unwrap();
        backend.put(Data::from("b"), Data::from(2i64), None).unwrap();

        backend.erase(&Data::from("a")).unwrap();
        backend.erase(&Data::from("a")).unwrap(); // idempotent
        assert_eq!(backend.size().unwrap(), 1);

        backend.clear().unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.keys().unwrap(), Data::Set(Default::default()));
    }
}
