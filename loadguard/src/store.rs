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

use std::{fmt::Debug, hash::BuildHasher};

use ahash::RandomState;
use hashbrown::hash_map::{Entry as HashMapEntry, HashMap};
use loadguard_common::{
    code::{Key, Value, Version},
    error::Result,
};
use parking_lot::RwLock;

use crate::values::CacheValue;

/// Decision of a [`Store::compute`] function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compute<V, T> {
    /// Leave the stored value untouched.
    Keep,
    /// Store the value.
    Put(CacheValue<V, T>),
    /// Remove the key.
    Remove,
}

/// Function applied by [`Store::compute`] to the value stored for a key.
pub type ComputeFn<'a, V, T> = &'a mut dyn FnMut(Option<&CacheValue<V, T>>) -> Compute<V, T>;

/// Key-value cache storage the access delegates write through.
///
/// Every operation is atomic per key. Errors are passed through the delegates unchanged.
pub trait Store<K, V, T>: Send + Sync + Debug + 'static
where
    K: Key,
    V: Value,
    T: Version,
{
    /// Get the value of a key.
    fn get(&self, key: &K) -> Result<Option<CacheValue<V, T>>>;

    /// Store a value, replacing any previous one.
    fn put(&self, key: K, value: CacheValue<V, T>) -> Result<()>;

    /// Store a value only if the key is absent. Returns `true` if the value has been stored.
    fn put_if_absent(&self, key: K, value: CacheValue<V, T>) -> Result<bool>;

    /// Remove a key.
    fn remove(&self, key: &K) -> Result<()>;

    /// Remove every key.
    fn remove_all(&self) -> Result<()>;

    /// Atomically replace the value of a key with the result of `f`.
    ///
    /// Returns `true` unless `f` decided to [`Compute::Keep`].
    fn compute(&self, key: &K, f: ComputeFn<'_, V, T>) -> Result<bool>;

    /// Returns `true` if the key holds any value.
    fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

type Shard<K, V, T> = HashMap<K, CacheValue<V, T>>;

/// Unbounded in-memory [`Store`].
pub struct MemoryStore<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    shards: Vec<RwLock<Shard<K, V, T>>>,
    hash_builder: RandomState,
}

impl<K, V, T> Debug for MemoryStore<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("shards", &self.shards.len()).finish()
    }
}

impl<K, V, T> Default for MemoryStore<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    fn default() -> Self {
        Self::new(16)
    }
}

impl<K, V, T> MemoryStore<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    /// Create an in-memory store with the given shard count.
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(Shard::default())).collect();
        Self {
            shards,
            hash_builder: RandomState::new(),
        }
    }

    /// Count of stored keys.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns `true` if the store holds no key.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &K) -> &RwLock<Shard<K, V, T>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }
}

impl<K, V, T> Store<K, V, T> for MemoryStore<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    fn get(&self, key: &K) -> Result<Option<CacheValue<V, T>>> {
        Ok(self.shard(key).read().get(key).cloned())
    }

    fn put(&self, key: K, value: CacheValue<V, T>) -> Result<()> {
        self.shard(&key).write().insert(key, value);
        Ok(())
    }

    fn put_if_absent(&self, key: K, value: CacheValue<V, T>) -> Result<bool> {
        match self.shard(&key).write().entry(key) {
            HashMapEntry::Occupied(_) => Ok(false),
            HashMapEntry::Vacant(v) => {
                v.insert(value);
                Ok(true)
            }
        }
    }

    fn remove(&self, key: &K) -> Result<()> {
        self.shard(key).write().remove(key);
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        self.shards.iter().for_each(|shard| shard.write().clear());
        Ok(())
    }

    fn compute(&self, key: &K, f: ComputeFn<'_, V, T>) -> Result<bool> {
        let mut shard = self.shard(key).write();
        match f(shard.get(key)) {
            Compute::Keep => Ok(false),
            Compute::Put(value) => {
                shard.insert(key.clone(), value);
                Ok(true)
            }
            Compute::Remove => {
                shard.remove(key);
                Ok(true)
            }
        }
    }
}
