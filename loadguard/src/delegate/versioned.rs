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

use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use loadguard_common::{
    clock::Timestamp,
    code::{Key, Owner, Value, Version},
    error::Result,
};

use super::AccessDelegate;
use crate::{
    region::Region,
    store::{Compute, Store},
    transaction::{Session, Synchronization},
    values::{accepts_versioned_load, CacheValue, VersionComparator, VersionedEntry},
};

/// Strategy for entities carrying a version.
///
/// Entries are tagged with their version and the store keeps the newest one. No key lock is taken and writes are
/// published after the origin store accepted them.
pub struct VersionedAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    region: Arc<Region>,
    store: Arc<dyn Store<K, V, T>>,
    comparator: VersionComparator<T>,
    _marker: PhantomData<fn(O)>,
}

impl<K, V, T, O> Debug for VersionedAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedAccessDelegate")
            .field("region", &self.region.name())
            .field("store", &self.store)
            .finish()
    }
}

impl<K, V, T, O> VersionedAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Create a versioned delegate ordering versions with `comparator`.
    pub fn new(region: Arc<Region>, store: Arc<dyn Store<K, V, T>>, comparator: VersionComparator<T>) -> Self {
        Self {
            region,
            store,
            comparator,
            _marker: PhantomData,
        }
    }

    fn publish(&self, key: &K, entry: VersionedEntry<V, T>) -> Result<bool> {
        publish(self.store.as_ref(), &self.comparator, key, &entry)
    }

    fn invalidate_region(&self) -> Result<()> {
        self.region.invalidate();
        self.store.remove_all()
    }

    pub(crate) fn on_remote_write(&self, keys: &[K]) -> Result<()> {
        keys.iter().try_for_each(|key| self.evict(key))
    }

    pub(crate) fn on_remote_region_invalidation(&self) -> Result<()> {
        self.store.remove_all()
    }
}

fn publish<K, V, T>(
    store: &dyn Store<K, V, T>,
    comparator: &VersionComparator<T>,
    key: &K,
    entry: &VersionedEntry<V, T>,
) -> Result<bool>
where
    K: Key,
    V: Value,
    T: Version,
{
    store.compute(key, &mut |current| entry.apply(current, comparator))
}

/// Applies a removal marker once the removal has committed.
struct Removal<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    region: Arc<Region>,
    store: Arc<dyn Store<K, V, T>>,
    comparator: VersionComparator<T>,
    key: K,
    version: Option<T>,
}

impl<K, V, T> Synchronization for Removal<K, V, T>
where
    K: Key,
    V: Value,
    T: Version,
{
    fn after_completion(self: Box<Self>, committed: bool) -> Result<()> {
        if !committed {
            return Ok(());
        }
        let marker = VersionedEntry::removal(self.version.clone(), self.region.next_timestamp());
        publish(self.store.as_ref(), &self.comparator, &self.key, &marker)?;
        Ok(())
    }
}

impl<K, V, T, O> AccessDelegate<K, V, T, O> for VersionedAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn get(&self, _: &Session<O>, key: &K, tx_timestamp: Timestamp) -> Result<Option<V>> {
        if !self.region.is_valid_for(tx_timestamp) {
            return Ok(None);
        }
        let value = match self.store.get(key)? {
            Some(CacheValue::Versioned(entry)) => entry.value().cloned(),
            Some(CacheValue::Value(value)) => Some(value),
            _ => None,
        };
        Ok(value)
    }

    fn put_from_load(
        &self,
        _: &Session<O>,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        version: Option<T>,
        minimal_put_override: bool,
    ) -> Result<bool> {
        if !self.region.is_valid_for(tx_timestamp) {
            return Ok(false);
        }
        let entry = VersionedEntry::new(value, version, tx_timestamp);
        let stored = self.store.compute(key, &mut |current| {
            let present = matches!(current, Some(CacheValue::Versioned(e)) if !e.is_removal());
            if minimal_put_override && present {
                return Compute::Keep;
            }
            if accepts_versioned_load(current, entry.version(), tx_timestamp, &self.comparator) {
                Compute::Put(CacheValue::Versioned(entry.clone()))
            } else {
                Compute::Keep
            }
        })?;
        if !stored {
            tracing::debug!(region = %self.region.name(), ?key, version = ?entry.version(), "[versioned]: load is not newer than cached entry");
        }
        Ok(stored)
    }

    fn insert(&self, _: &Session<O>, _: &K, _: V, _: Option<T>) -> Result<bool> {
        Ok(false)
    }

    fn update(&self, _: &Session<O>, _: &K, _: V, _: Option<T>, _: Option<T>) -> Result<bool> {
        Ok(false)
    }

    fn after_insert(&self, _: &Session<O>, key: &K, value: V, version: Option<T>) -> Result<bool> {
        self.publish(key, VersionedEntry::new(value, version, self.region.next_timestamp()))
    }

    fn after_update(&self, _: &Session<O>, key: &K, value: V, current_version: Option<T>, _: Option<T>) -> Result<bool> {
        self.publish(key, VersionedEntry::new(value, current_version, self.region.next_timestamp()))
    }

    fn remove(&self, session: &Session<O>, key: &K, version: Option<T>) -> Result<()> {
        session.register(Removal {
            region: self.region.clone(),
            store: self.store.clone(),
            comparator: self.comparator.clone(),
            key: key.clone(),
            version,
        })
    }

    fn remove_all(&self, _: &Session<O>) -> Result<()> {
        self.invalidate_region()
    }

    fn unlock_item(&self, _: &Session<O>, _: &K) -> Result<()> {
        Ok(())
    }

    fn evict(&self, key: &K) -> Result<()> {
        self.publish(key, VersionedEntry::removal(None, self.region.next_timestamp()))?;
        Ok(())
    }

    fn evict_all(&self) -> Result<()> {
        self.invalidate_region()
    }
}
