//! The in-memory storage backend.

use super::{Backend, Snapshot};
use skein_core::{Data, DataType, Error, ErrorKind, Result, Timestamp};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Entry {
    value: Data,
    expiry: Option<Timestamp>,
}

/// Volatile key-value engine: a hash map of entries plus an ordered expiry
/// index. This is the backend every clone runs on.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<Data, Entry>,
    expiry_index: BTreeSet<(Timestamp, Data)>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_index_entry(&mut self, key: &Data) {
        if let Some(entry) = self.entries.get(key) {
            if let Some(expiry) = entry.expiry {
                self.expiry_index.remove(&(expiry, key.clone()));
            }
        }
    }

    fn set_expiry(&mut self, key: &Data, expiry: Timestamp) {
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(old) = entry.expiry.replace(expiry) {
                self.expiry_index.remove(&(old, key.clone()));
            }
            self.expiry_index.insert((expiry, key.clone()));
        }
    }
}

impl Backend for MemoryBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> Result<()> {
        self.drop_index_entry(&key);
        if let Some(expiry) = expiry {
            self.expiry_index.insert((expiry, key.clone()));
        }
        self.entries.insert(key, Entry { value, expiry });
        Ok(())
    }

    fn add(
        &mut self,
        key: &Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> Result<()> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value.add(value)?;
            }
            None => {
                let mut fresh = init_type.zero();
                fresh.add(value)?;
                self.entries.insert(key.clone(), Entry { value: fresh, expiry: None });
            }
        }
        if let Some(expiry) = expiry {
            self.set_expiry(key, expiry);
        }
        Ok(())
    }

    fn subtract(&mut self, key: &Data, value: &Data, expiry: Option<Timestamp>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::new(ErrorKind::NoSuchKey))?;
        entry.value.subtract(value)?;
        if let Some(expiry) = expiry {
            self.set_expiry(key, expiry);
        }
        Ok(())
    }

    fn erase(&mut self, key: &Data) -> Result<()> {
        self.drop_index_entry(key);
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.expiry_index.clear();
        Ok(())
    }

    fn expire(&mut self, key: &Data, now: Timestamp) -> Result<bool> {
        let due = self
            .entries
            .get(key)
            .and_then(|entry| entry.expiry)
            .is_some_and(|expiry| expiry <= now);
        if due {
            self.drop_index_entry(key);
            self.entries.remove(key);
        }
        Ok(due)
    }

    fn get(&self, key: &Data) -> Result<Data> {
        self.entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| Error::new(ErrorKind::NoSuchKey))
    }

    fn exists(&self, key: &Data) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn keys(&self) -> Result<Data> {
        Ok(Data::Set(self.entries.keys().cloned().collect()))
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let entries = self
            .entries
            .iter()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect();
        let expiries = self
            .expiry_index
            .iter()
            .map(|(expiry, key)| (key.clone(), *expiry))
            .collect();
        Ok(Snapshot { entries, expiries })
    }

    fn expiries(&self) -> Result<Vec<(Data, Timestamp)>> {
        Ok(self
            .expiry_index
            .iter()
            .map(|(expiry, key)| (key.clone(), *expiry))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::Timespan;

    #[test]
    fn put_then_get() {
        let mut backend = MemoryBackend::new();
        backend.put(Data::from("a"), Data::from(1i64), None).unwrap();
        assert_eq!(backend.get(&Data::from("a")).unwrap(), Data::from(1i64));
        assert!(backend.exists(&Data::from("a")).unwrap());
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn get_missing_is_no_such_key() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend.get(&Data::from("ghost")).unwrap_err().kind(),
            ErrorKind::NoSuchKey
        );
    }

    #[test]
    fn put_overwrites_and_clears_expiry() {
        let mut backend = MemoryBackend::new();
        let expiry = Timestamp::from_nanos(100);
        backend.put(Data::from("a"), Data::from(1i64), Some(expiry)).unwrap();
        assert_eq!(backend.expiries().unwrap().len(), 1);

        backend.put(Data::from("a"), Data::from(2i64), None).unwrap();
        assert!(backend.expiries().unwrap().is_empty());
        assert_eq!(backend.get(&Data::from("a")).unwrap(), Data::from(2i64));
    }

    #[test]
    fn add_initializes_absent_targets() {
        let mut backend = MemoryBackend::new();
        backend
            .add(&Data::from("n"), Data::Count(5), DataType::Count, None)
            .unwrap();
        backend
            .add(&Data::from("n"), Data::Count(3), DataType::Count, None)
            .unwrap();
        assert_eq!(backend.get(&Data::from("n")).unwrap(), Data::Count(8));
    }

    #[test]
    fn add_refreshes_expiry_only_when_provided() {
        let mut backend = MemoryBackend::new();
        let first = Timestamp::from_nanos(100);
        let second = Timestamp::from_nanos(500);

        backend
            .add(&Data::from("n"), Data::Count(1), DataType::Count, Some(first))
            .unwrap();
        assert_eq!(backend.expiries().unwrap(), vec![(Data::from("n"), first)]);

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
    fn subtract_missing_key_fails() {
        let mut backend = MemoryBackend::new();
        assert_eq!(
            backend
                .subtract(&Data::from("ghost"), &Data::Count(1), None)
                .unwrap_err()
                .kind(),
            ErrorKind::NoSuchKey
        );
    }

    #[test]
    fn expire_honors_deadline() {
        let mut backend = MemoryBackend::new();
        let key = Data::from("t");
        backend
            .put(key.clone(), Data::from("x"), Some(Timestamp::from_nanos(100)))
            .unwrap();

        assert!(!backend.expire(&key, Timestamp::from_nanos(50)).unwrap());
        assert!(backend.exists(&key).unwrap());

        assert!(backend.expire(&key, Timestamp::from_nanos(100)).unwrap());
        assert!(!backend.exists(&key).unwrap());
        assert!(backend.expiries().unwrap().is_empty());

        // Second expire is a no-op.
        assert!(!backend.expire(&key, Timestamp::from_nanos(200)).unwrap());
    }

    #[test]
    fn expire_ignores_entries_without_expiry() {
        let mut backend = MemoryBackend::new();
        backend.put(Data::from("k"), Data::from(1i64), None).unwrap();
        assert!(!backend.expire(&Data::from("k"), Timestamp::now()).unwrap());
        assert!(backend.exists(&Data::from("k")).unwrap());
    }

    #[test]
    fn expiries_come_out_ordered() {
        let mut backend = MemoryBackend::new();
        let late = Timestamp::EPOCH + Timespan::from_secs(10);
        let soon = Timestamp::EPOCH + Timespan::from_secs(1);
        backend.put(Data::from("late"), Data::None, Some(late)).unwrap();
        backend.put(Data::from("soon"), Data::None, Some(soon)).unwrap();

        let expiries = backend.expiries().unwrap();
        assert_eq!(
            expiries,
            vec![(Data::from("soon"), soon), (Data::from("late"), late)]
        );
    }

    #[test]
    fn snapshot_captures_entries_and_expiries() {
        let mut backend = MemoryBackend::new();
        let expiry = Timestamp::from_nanos(100);
        backend.put(Data::from("a"), Data::from(1i64), None).unwrap();
        backend.put(Data::from("b"), Data::from(2i64), Some(expiry)).unwrap();

        let mut snapshot = backend.snapshot().unwrap();
        snapshot.entries.sort();
        assert_eq!(
            snapshot.entries,
            vec![
                (Data::from("a"), Data::from(1i64)),
                (Data::from("b"), Data::from(2i64)),
            ]
        );
        assert_eq!(snapshot.expiries, vec![(Data::from("b"), expiry)]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut backend = MemoryBackend::new();
        backend
            .put(Data::from("a"), Data::from(1i64), Some(Timestamp::from_nanos(5)))
            .unwrap();
        backend.clear().unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.expiries().unwrap().is_empty());
    }
}
