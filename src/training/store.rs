use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

pub const DEFAULT_SHARDS: usize = 32;

/// Per-key store contract shared by the Q-table and the mastery map.
pub trait KeyValueStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    /// Writes `new` only if the current value equals `expected` (`None` = absent).
    /// On conflict returns the value actually present.
    fn compare_and_swap(&self, key: &K, expected: Option<&V>, new: V) -> Result<(), Option<V>>;

    fn snapshot(&self) -> Vec<(K, V)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-modify-write through compare-and-swap. `f` sees the current value and returns the
/// replacement, or `None` to leave the entry untouched. Retries until the swap lands, so
/// concurrent writers on one key serialize without losing updates.
pub fn cas_update<K, V, F>(store: &dyn KeyValueStore<K, V>, key: &K, mut f: F) -> Option<V>
where
    V: Clone,
    F: FnMut(Option<&V>) -> Option<V>,
{
    loop {
        let current = store.get(key);
        let next = f(current.as_ref())?;
        match store.compare_and_swap(key, current.as_ref(), next.clone()) {
            Ok(()) => return Some(next),
            Err(_) => std::hint::spin_loop(),
        }
    }
}

pub struct ShardedStore<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
    hasher: RandomState,
}

impl<K, V> ShardedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let store = Self::new();
        for (key, value) in entries {
            store.shard(&key).lock().insert(key, value);
        }
        store
    }

    fn shard(&self, key: &K) -> &Mutex<HashMap<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }
}

impl<K, V> Default for ShardedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyValueStore<K, V> for ShardedStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.shard(key).lock().get(key).cloned()
    }

    fn compare_and_swap(&self, key: &K, expected: Option<&V>, new: V) -> Result<(), Option<V>> {
        let mut guard = self.shard(key).lock();
        let current = guard.get(key);
        if current != expected {
            return Err(current.cloned());
        }
        guard.insert(key.clone(), new);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            out.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}
