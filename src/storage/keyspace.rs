use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, SystemTime},
};

/// Stored value. A tagged sum so further types can be added without
/// reworking the map; only byte strings exist today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Vec<u8>),
}

impl Value {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::String(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Shared keyspace. Expiry is lazy: nothing scans for dead entries, readers
/// simply treat an elapsed expiry as absent and drop the entry on the way.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: RwLock<HashMap<Vec<u8>, Entry>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| SystemTime::now().checked_add(ttl));
        self.set_at(key, value, expires_at);
    }

    /// Installs an entry with an absolute deadline. Used by the snapshot
    /// loader, whose records carry wall-clock expiry timestamps.
    pub fn set_at(&self, key: &[u8], value: &[u8], expires_at: Option<SystemTime>) {
        let entry = Entry {
            value: Value::String(value.to_vec()),
            expires_at,
        };
        self.entries.write().unwrap().insert(key.to_vec(), entry);
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = SystemTime::now();
        {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    return Some(entry.value.as_bytes().to_vec())
                }
                Some(_) => {}
                None => return None,
            }
        }
        // The entry expired; re-check under the write lock before removing,
        // a concurrent set may have replaced it in the meantime.
        let mut entries = self.entries.write().unwrap();
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now))
        {
            entries.remove(key);
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let now = SystemTime::now();
        self.entries
            .read()
            .unwrap()
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        let now = SystemTime::now();
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let now = SystemTime::now();
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
