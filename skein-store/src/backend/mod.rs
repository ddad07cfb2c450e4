//! Storage backends for store actors.
//!
//! A backend is a single-threaded key-value engine over [`Data`], owned
//! exclusively by one store actor; the contract therefore has no interior
//! locking and no async surface. Two implementations exist: the in-memory
//! engine every clone uses, and a SQLite engine for masters that must
//! survive restarts.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use serde::{Deserialize, Serialize};
use skein_core::{Data, DataType, Error, Result, Timestamp};
use std::collections::BTreeMap;

/// A full copy of a backend's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// All entries, as `(key, value)` pairs.
    pub entries: Vec<(Data, Data)>,
    /// The expiries of the subset of entries that have one.
    pub expiries: Vec<(Data, Timestamp)>,
}

impl Snapshot {
    /// Number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// String-keyed construction options for a backend.
///
/// Persistent variants require at least a `path` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOptions(BTreeMap<String, Data>);

impl BackendOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option, builder-style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Data>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an option.
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.0.get(key)
    }

    /// Look up a string-valued option.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Data::String(value)) => Some(value),
            _ => None,
        }
    }
}

/// The capability set of a storage backend.
///
/// All operations return `backend_failure` when the engine itself breaks;
/// data-plane failures (`no_such_key`, `type_clash`) are listed per
/// operation.
pub trait Backend: Send {
    /// Insert or overwrite an entry. An absent `expiry` leaves the rewritten
    /// entry without one.
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<()>;

    /// Augment the entry under `key` with `value`, initializing an absent
    /// target from `init_type`. A provided `expiry` replaces the current
    /// one; an absent `expiry` preserves it. Fails with `type_clash` on
    /// incompatible operands.
    fn add(
        &mut self,
        key: &Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> Result<()>;

    /// Diminish the entry under `key` by `value`. Expiry handling as in
    /// [`Backend::add`]. Fails with `no_such_key` for absent keys and
    /// `type_clash` on incompatible operands.
    fn subtract(&mut self, key: &Data, value: &Data, expiry: Option<Timestamp>) -> Result<()>;

    /// Remove an entry; absent keys succeed silently.
    fn erase(&mut self, key: &Data) -> Result<()>;

    /// Remove all entries.
    fn clear(&mut self) -> Result<()>;

    /// Remove `key` iff it exists and its expiry is at or before `now`.
    /// Returns whether a removal happened.
    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool>;

    /// Read the value under `key`; fails with `no_such_key` when absent.
    fn get(&self, key: &Data) -> Result<Data>;

    /// Whether `key` is present.
    fn exists(&self, key: &Data) -> Result<bool>;

    /// Number of entries.
    fn size(&self) -> Result<u64>;

    /// All keys, as a set value.
    fn keys(&self) -> Result<Data>;

    /// A full copy of the contents.
    fn snapshot(&self) -> Result<Snapshot>;

    /// The `(key, expiry)` pairs of all entries carrying an expiry, ordered
    /// by expiry.
    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>>;
}

/// The available backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Volatile in-memory engine.
    Memory,
    /// Persistent SQLite engine.
    Sqlite,
}

/// Construct a backend of the given type.
///
/// A persistent backend whose construction fails is returned in its
/// degenerate state, where every operation reports `backend_failure`; probe
/// with [`SqliteBackend::init_failed`] when that distinction matters.
pub fn make_backend(ty: BackendType, options: &BackendOptions) -> Box<dyn Backend> {
    match ty {
        BackendType::Memory => Box::new(MemoryBackend::new()),
        BackendType::Sqlite => Box::new(SqliteBackend::new(options)),
    }
}

pub(crate) fn backend_failure(context: impl std::fmt::Display) -> Error {
    Error::with_message(skein_core::ErrorKind::BackendFailure, context.to_string())
}
