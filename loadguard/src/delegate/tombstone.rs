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

use std::{fmt::Debug, slice, sync::Arc};

use loadguard_common::{
    clock::Timestamp,
    code::{Key, Owner, Value, Version},
    error::Result,
    option::OptionExt,
};
use uuid::Uuid;

use super::{announced, AccessDelegate};
use crate::{
    broadcast::InvalidationBridge,
    region::Region,
    store::Store,
    transaction::{Session, Synchronization},
    values::{CacheValue, TombstoneUpdate},
};

/// Optimistic strategy based on timestamps.
///
/// A write merges a tombstone naming it into the stored value. Loads that started before the newest write to the
/// key completed are refused by the store-side merge, so no key lock is ever taken.
pub struct TombstoneAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    region: Arc<Region>,
    store: Arc<dyn Store<K, V, T>>,
    bridge: Option<Arc<InvalidationBridge<K, O>>>,
}

impl<K, V, T, O> Debug for TombstoneAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneAccessDelegate")
            .field("region", &self.region.name())
            .field("store", &self.store)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl<K, V, T, O> TombstoneAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Create a tombstone delegate.
    pub fn new(
        region: Arc<Region>,
        store: Arc<dyn Store<K, V, T>>,
        bridge: Option<Arc<InvalidationBridge<K, O>>>,
    ) -> Self {
        Self { region, store, bridge }
    }

    fn write(&self, session: &Session<O>, key: &K, value: Option<V>) -> Result<()> {
        let writer = Uuid::new_v4();
        let timestamp = self.region.next_timestamp();
        apply(
            &self.region,
            self.store.as_ref(),
            key,
            &TombstoneUpdate::Begin { writer, timestamp },
        )?;
        tracing::trace!(region = %self.region.name(), ?key, %writer, timestamp, "[tombstone]: write began");

        self.bridge
            .as_ref()
            .then(|bridge| announced("begin invalidation", bridge.announce_begin(slice::from_ref(key), writer)));

        session.register(Complete {
            region: self.region.clone(),
            store: self.store.clone(),
            bridge: self.bridge.clone(),
            key: key.clone(),
            writer,
            value,
        })
    }

    fn invalidate_region(&self) -> Result<()> {
        self.region.invalidate();
        self.store.remove_all()?;
        self.bridge
            .as_ref()
            .then(|bridge| announced("region invalidation", bridge.announce_region_invalidation()));
        Ok(())
    }

    /// Both the begin and the end of a remote write leave an empty tombstone, so loads that started before the end
    /// are refused.
    pub(crate) fn on_remote_write(&self, keys: &[K]) -> Result<()> {
        for key in keys {
            let timestamp = self.region.next_timestamp();
            apply(
                &self.region,
                self.store.as_ref(),
                key,
                &TombstoneUpdate::Evict { timestamp },
            )?;
        }
        Ok(())
    }

    pub(crate) fn on_remote_region_invalidation(&self) -> Result<()> {
        self.store.remove_all()
    }
}

fn apply<K, V, T>(region: &Region, store: &dyn Store<K, V, T>, key: &K, update: &TombstoneUpdate<V>) -> Result<bool>
where
    K: Key,
    V: Value,
    T: Version,
{
    let now = region.now();
    let expiration = region.tombstone_expiration();
    store.compute(key, &mut |current| update.apply(current, now, expiration))
}

/// Publishes the outcome of a write when its transaction completes.
struct Complete<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    region: Arc<Region>,
    store: Arc<dyn Store<K, V, T>>,
    bridge: Option<Arc<InvalidationBridge<K, O>>>,
    key: K,
    writer: Uuid,
    value: Option<V>,
}

impl<K, V, T, O> Synchronization for Complete<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn before_completion(&mut self) -> Result<()> {
        if let Some(value) = &self.value {
            let update = TombstoneUpdate::Prepare {
                writer: self.writer,
                value: value.clone(),
            };
            apply(&self.region, self.store.as_ref(), &self.key, &update)?;
        }
        Ok(())
    }

    fn after_completion(self: Box<Self>, committed: bool) -> Result<()> {
        let timestamp = self.region.next_timestamp();
        let update = TombstoneUpdate::Complete {
            writer: self.writer,
            timestamp,
            value: self.value.clone(),
            committed,
        };
        let res = apply(&self.region, self.store.as_ref(), &self.key, &update);
        tracing::trace!(region = %self.region.name(), key = ?self.key, writer = %self.writer, committed, "[tombstone]: write completed");
        self.bridge.as_ref().then(|bridge| {
            announced(
                "end invalidation",
                bridge.announce_end(slice::from_ref(&self.key), self.writer),
            )
        });
        res.map(|_| ())
    }
}

impl<K, V, T, O> AccessDelegate<K, V, T, O> for TombstoneAccessDelegate<K, V, T, O>
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
            Some(CacheValue::Value(value)) => Some(value),
            Some(CacheValue::Future(update)) if update.is_committed() => Some(update.value().clone()),
            Some(CacheValue::Versioned(entry)) => entry.value().cloned(),
            Some(CacheValue::Future(_)) | Some(CacheValue::Tombstone(_)) | None => None,
        };
        Ok(value)
    }

    fn put_from_load(
        &self,
        _: &Session<O>,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        _: Option<T>,
        _: bool,
    ) -> Result<bool> {
        if !self.region.is_valid_for(tx_timestamp) {
            tracing::debug!(region = %self.region.name(), ?key, tx_timestamp, "[tombstone]: load predates region invalidation");
            return Ok(false);
        }
        let stored = apply(
            &self.region,
            self.store.as_ref(),
            key,
            &TombstoneUpdate::Load { value, tx_timestamp },
        )?;
        if !stored {
            tracing::debug!(region = %self.region.name(), ?key, tx_timestamp, "[tombstone]: load refused by tombstone");
        }
        Ok(stored)
    }

    fn insert(&self, session: &Session<O>, key: &K, value: V, _: Option<T>) -> Result<bool> {
        self.write(session, key, Some(value))?;
        Ok(true)
    }

    fn update(&self, session: &Session<O>, key: &K, value: V, _: Option<T>, _: Option<T>) -> Result<bool> {
        self.write(session, key, Some(value))?;
        Ok(true)
    }

    fn after_insert(&self, _: &Session<O>, _: &K, _: V, _: Option<T>) -> Result<bool> {
        Ok(false)
    }

    fn after_update(&self, _: &Session<O>, _: &K, _: V, _: Option<T>, _: Option<T>) -> Result<bool> {
        Ok(false)
    }

    fn remove(&self, session: &Session<O>, key: &K, _: Option<T>) -> Result<()> {
        self.write(session, key, None)
    }

    fn remove_all(&self, _: &Session<O>) -> Result<()> {
        self.invalidate_region()
    }

    fn unlock_item(&self, _: &Session<O>, _: &K) -> Result<()> {
        Ok(())
    }

    fn evict(&self, key: &K) -> Result<()> {
        let timestamp = self.region.next_timestamp();
        apply(
            &self.region,
            self.store.as_ref(),
            key,
            &TombstoneUpdate::Evict { timestamp },
        )?;
        self.bridge
            .as_ref()
            .then(|bridge| announced("eviction", bridge.announce_eviction(key)));
        Ok(())
    }

    fn evict_all(&self) -> Result<()> {
        self.invalidate_region()
    }
}
