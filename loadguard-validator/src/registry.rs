// Copyright 2026 loadguard Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, hash::BuildHasher, sync::Arc};

use ahash::RandomState;
use hashbrown::hash_map::{Entry as HashMapEntry, HashMap};
use loadguard_common::code::{Key, Owner};
use parking_lot::{Mutex, RwLock};

use crate::pending::KeyState;

/// Per-key protocol state guarded by the key lock.
pub(crate) type PendingPutMap<O> = Arc<Mutex<KeyState<O>>>;

type Shard<K, O> = HashMap<K, PendingPutMap<O>>;

/// Registry of the per-key pending put maps.
///
/// The shard locks only guard membership. They are held for a map lookup or update and never while waiting for a
/// key lock, so a key lock may be held while touching a shard but not the other way round.
pub(crate) struct PendingPutRegistry<K, O>
where
    K: Key,
    O: Owner,
{
    shards: Vec<RwLock<Shard<K, O>>>,
    hash_builder: RandomState,
}

impl<K, O> Debug for PendingPutRegistry<K, O>
where
    K: Key,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPutRegistry")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl<K, O> PendingPutRegistry<K, O>
where
    K: Key,
    O: Owner,
{
    pub(crate) fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(Shard::default())).collect();
        Self {
            shards,
            hash_builder: RandomState::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<PendingPutMap<O>> {
        self.shard(key).read().get(key).cloned()
    }

    /// Insert `map` unless the key already has one. Returns the map that ends up registered.
    pub(crate) fn insert_if_absent(&self, key: K, map: PendingPutMap<O>) -> PendingPutMap<O> {
        match self.shard(&key).write().entry(key) {
            HashMapEntry::Occupied(o) => o.get().clone(),
            HashMapEntry::Vacant(v) => v.insert(map).clone(),
        }
    }

    pub(crate) fn get_or_insert_default(&self, key: &K) -> PendingPutMap<O> {
        if let Some(map) = self.get(key) {
            return map;
        }
        self.insert_if_absent(key.clone(), Arc::new(Mutex::new(KeyState::default())))
    }

    /// Remove the key only if it still maps to `map`.
    ///
    /// Returns `true` if the map has been removed.
    pub(crate) fn remove_if_same(&self, key: &K, map: &PendingPutMap<O>) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(current) if Arc::ptr_eq(current, map) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Clone out every registered map.
    ///
    /// The snapshot is taken shard by shard, maps registered concurrently may or may not be included.
    pub(crate) fn snapshot(&self) -> Vec<(K, PendingPutMap<O>)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(k, m)| (k.clone(), m.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    fn shard(&self, key: &K) -> &RwLock<Shard<K, O>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_membership() {
        let registry = PendingPutRegistry::<u64, u64>::new(4);
        assert!(registry.get(&1).is_none());

        let a = registry.get_or_insert_default(&1);
        let b = registry.get_or_insert_default(&1);
        assert!(Arc::ptr_eq(&a, &b));

        let other = Arc::new(Mutex::new(KeyState::default()));
        let c = registry.insert_if_absent(1, other.clone());
        assert!(Arc::ptr_eq(&a, &c));

        assert!(!registry.remove_if_same(&1, &other));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_if_same(&1, &a));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_snapshot() {
        let registry = PendingPutRegistry::<u64, u64>::new(3);
        for key in 0..100 {
            registry.get_or_insert_default(&key);
        }
        let mut keys = registry.snapshot().into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        keys.sort();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
    }
}
