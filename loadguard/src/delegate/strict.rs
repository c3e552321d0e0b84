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

use std::{fmt::Debug, sync::Arc};

use loadguard_common::{
    clock::Timestamp,
    code::{Key, Owner, Value, Version},
    error::{Error, Result},
    option::OptionExt,
};
use loadguard_validator::PutFromLoadValidator;

use super::{announced, AccessDelegate};
use crate::{
    broadcast::InvalidationBridge,
    region::Region,
    store::Store,
    transaction::{Session, Synchronization},
    values::CacheValue,
};

/// Pessimistic strategy.
///
/// A write keeps the key invalidated from before it touches the cache until its transaction completes. Loads that
/// raced with the write are refused by the [`PutFromLoadValidator`].
pub struct StrictAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    region: Arc<Region>,
    validator: Arc<PutFromLoadValidator<K, O>>,
    store: Arc<dyn Store<K, V, T>>,
    bridge: Option<Arc<InvalidationBridge<K, O>>>,
}

impl<K, V, T, O> Debug for StrictAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrictAccessDelegate")
            .field("region", &self.region.name())
            .field("store", &self.store)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl<K, V, T, O> StrictAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Create a strict delegate.
    pub fn new(
        region: Arc<Region>,
        validator: Arc<PutFromLoadValidator<K, O>>,
        store: Arc<dyn Store<K, V, T>>,
        bridge: Option<Arc<InvalidationBridge<K, O>>>,
    ) -> Self {
        Self {
            region,
            validator,
            store,
            bridge,
        }
    }

    fn write(&self, session: &Session<O>, key: &K, value: Option<V>) -> Result<()> {
        let owner = session.owner().clone();
        if !self.validator.begin_invalidating_key(owner.clone(), key) {
            return Err(Error::invalidation_failed(
                key,
                self.validator.config().invalidation_lock_timeout,
            ));
        }

        let unlock = Unlock {
            validator: self.validator.clone(),
            store: self.store.clone(),
            bridge: self.bridge.clone(),
            owner: owner.clone(),
            key: key.clone(),
            written: value.is_some(),
        };
        if let Err(e) = session.register(unlock) {
            self.validator.end_invalidating_key(owner, key);
            return Err(e);
        }

        self.bridge
            .as_ref()
            .then(|bridge| announced("begin invalidation", bridge.begin_invalidating_key(&owner, key).map(|_| ())));

        match value {
            Some(value) => self.store.put(key.clone(), CacheValue::Value(value)),
            None => self.store.remove(key),
        }
    }

    fn invalidate_region(&self) -> Result<()> {
        if !self.validator.invalidate_region() {
            return Err(Error::region_invalidation_failed(
                self.region.name(),
                self.validator.config().invalidation_lock_timeout,
            ));
        }
        self.region.invalidate();
        self.store.remove_all()?;
        self.bridge
            .as_ref()
            .then(|bridge| announced("region invalidation", bridge.announce_region_invalidation()));
        Ok(())
    }

    /// The validator already refuses loads of the keys.
    pub(crate) fn on_remote_write(&self, keys: &[K]) -> Result<()> {
        keys.iter().try_for_each(|key| self.store.remove(key))
    }

    pub(crate) fn on_remote_region_invalidation(&self) -> Result<()> {
        self.store.remove_all()
    }
}

fn unlock<K, O>(
    validator: &PutFromLoadValidator<K, O>,
    bridge: Option<&Arc<InvalidationBridge<K, O>>>,
    owner: &O,
    key: &K,
) where
    K: Key,
    O: Owner,
{
    // Lock timeouts are logged by the validator.
    validator.end_invalidating_key(owner.clone(), key);
    bridge.then(|bridge| announced("end invalidation", bridge.end_invalidating_key(owner, key)));
}

/// Ends the invalidation of a write when its transaction completes.
struct Unlock<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    validator: Arc<PutFromLoadValidator<K, O>>,
    store: Arc<dyn Store<K, V, T>>,
    bridge: Option<Arc<InvalidationBridge<K, O>>>,
    owner: O,
    key: K,
    written: bool,
}

impl<K, V, T, O> Synchronization for Unlock<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn after_completion(self: Box<Self>, committed: bool) -> Result<()> {
        // A rolled back write must not leave its value behind.
        let res = if !committed && self.written {
            self.store.remove(&self.key)
        } else {
            Ok(())
        };
        unlock(&self.validator, self.bridge.as_ref(), &self.owner, &self.key);
        res
    }
}

impl<K, V, T, O> AccessDelegate<K, V, T, O> for StrictAccessDelegate<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn get(&self, session: &Session<O>, key: &K, tx_timestamp: Timestamp) -> Result<Option<V>> {
        if !self.region.is_valid_for(tx_timestamp) {
            return Ok(None);
        }
        match self.store.get(key)? {
            Some(CacheValue::Value(value)) => Ok(Some(value)),
            _ => {
                self.validator.register_pending_put(key, session.owner().clone());
                Ok(None)
            }
        }
    }

    fn put_from_load(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        _: Option<T>,
        minimal_put_override: bool,
    ) -> Result<bool> {
        if !self.region.is_valid_for(tx_timestamp) {
            return Ok(false);
        }
        if minimal_put_override && self.store.contains(key)? {
            tracing::trace!(region = %self.region.name(), ?key, "[strict]: key already cached, skip minimal put");
            return Ok(false);
        }
        let Some(lock) = self.validator.acquire_put_from_load_lock(key, session.owner()) else {
            tracing::debug!(region = %self.region.name(), ?key, owner = ?session.owner(), "[strict]: put from load refused");
            return Ok(false);
        };
        let res = self.store.put_if_absent(key.clone(), CacheValue::Value(value));
        self.validator.release_put_from_load_lock(lock);
        res
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

    fn unlock_item(&self, session: &Session<O>, key: &K) -> Result<()> {
        unlock(&self.validator, self.bridge.as_ref(), session.owner(), key);
        Ok(())
    }

    fn evict(&self, key: &K) -> Result<()> {
        if !self.validator.invalidate_key(key) {
            return Err(Error::invalidation_failed(
                key,
                self.validator.config().invalidation_lock_timeout,
            ));
        }
        self.store.remove(key)?;
        self.bridge
            .as_ref()
            .then(|bridge| announced("eviction", bridge.announce_eviction(key)));
        Ok(())
    }

    fn evict_all(&self) -> Result<()> {
        self.invalidate_region()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use loadguard_common::{clock::ManualClock, error::ErrorKind};
    use loadguard_validator::ValidatorConfig;

    use super::*;
    use crate::store::MemoryStore;

    struct Fixture {
        clock: Arc<ManualClock>,
        region: Arc<Region>,
        validator: Arc<PutFromLoadValidator<u64, &'static str>>,
        store: Arc<MemoryStore<u64, String, u64>>,
        delegate: StrictAccessDelegate<u64, String, u64, &'static str>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let region = Arc::new(Region::new("strict", clock.clone(), Duration::from_secs(60)));
        let config = ValidatorConfig::default()
            .with_put_lock_timeout(Duration::from_millis(20))
            .with_invalidation_lock_timeout(Duration::from_millis(100));
        let validator = Arc::new(PutFromLoadValidator::new("strict", config, clock.clone()).unwrap());
        let store = Arc::new(MemoryStore::<u64, String, u64>::new(4));
        let delegate = StrictAccessDelegate::new(region.clone(), validator.clone(), store.clone(), None);
        Fixture {
            clock,
            region,
            validator,
            store,
            delegate,
        }
    }

    fn value(s: &str) -> String {
        s.to_string()
    }

    #[test_log::test]
    fn test_load_then_cache() {
        let f = fixture();
        let session = Session::new("t1");
        let tx = f.region.next_timestamp();

        assert_eq!(f.delegate.get(&session, &1, tx).unwrap(), None);
        assert_eq!(f.validator.pending_put_count(), 1);
        assert!(f.delegate.put_from_load(&session, &1, value("v1"), tx, None, false).unwrap());
        assert_eq!(f.delegate.get(&session, &1, tx).unwrap(), Some(value("v1")));

        // Another load of a cached key does not overwrite it.
        let other = Session::new("t2");
        assert!(!f.delegate.put_from_load(&other, &1, value("v2"), tx, None, true).unwrap());
        assert!(!f.delegate.put_from_load(&other, &1, value("v2"), tx, None, false).unwrap());
        assert_eq!(f.store.get(&1).unwrap(), Some(CacheValue::Value(value("v1"))));
    }

    #[test_log::test]
    fn test_update_races_load() {
        let f = fixture();
        let loader = Session::new("t1");
        let writer = Session::new("t2");
        let tx = f.region.next_timestamp();

        assert_eq!(f.delegate.get(&loader, &1, tx).unwrap(), None);
        // t1 reads the old row from the origin store, then t2 updates it.
        assert!(f.delegate.update(&writer, &1, value("new"), None, None).unwrap());
        assert!(!f.delegate.put_from_load(&loader, &1, value("old"), tx, None, false).unwrap());
        writer.commit().unwrap();

        assert_eq!(f.store.get(&1).unwrap(), Some(CacheValue::Value(value("new"))));
        assert!(f.validator.is_idle());
    }

    #[test_log::test]
    fn test_rollback_drops_written_value() {
        let f = fixture();
        let writer = Session::new("t1");
        f.delegate.insert(&writer, &1, value("v"), None).unwrap();
        assert!(f.store.contains(&1).unwrap());
        writer.rollback().unwrap();
        assert!(!f.store.contains(&1).unwrap());
        assert!(f.validator.is_idle());
    }

    #[test_log::test]
    fn test_unlock_item_is_idempotent() {
        let f = fixture();
        let writer = Session::new("t1");
        f.delegate.remove(&writer, &1, None).unwrap();
        f.delegate.unlock_item(&writer, &1).unwrap();
        f.delegate.unlock_item(&writer, &1).unwrap();
        writer.commit().unwrap();
        assert!(f.validator.is_idle());
    }

    #[test_log::test]
    fn test_update_fails_while_key_locked_for_put() {
        let f = fixture();
        let loader = Session::new("t1");
        let writer = Session::new("t2");
        let tx = f.region.next_timestamp();
        f.delegate.get(&loader, &1, tx).unwrap();

        let lock = f.validator.acquire_put_from_load_lock(&1, &"t1").unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let err = f.delegate.update(&writer, &1, value("v"), None, None).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::InvalidationFailed);
            });
        });
        f.validator.release_put_from_load_lock(lock);
        assert!(!f.store.contains(&1).unwrap());
    }

    #[test_log::test]
    fn test_evict_all_rejects_naked_puts_during_grace() {
        let f = fixture();
        let session = Session::new("t1");
        let tx = f.region.next_timestamp();
        f.store.put(1, CacheValue::Value(value("v"))).unwrap();

        f.delegate.evict_all().unwrap();
        assert!(f.store.is_empty());
        // Loads started before the invalidation are stale.
        assert!(!f.delegate.put_from_load(&session, &1, value("v"), tx, None, false).unwrap());

        f.clock.advance(Duration::from_secs(1));
        let tx = f.region.next_timestamp();
        assert!(!f.delegate.put_from_load(&session, &2, value("v"), tx, None, false).unwrap());

        f.clock.advance(Duration::from_secs(20));
        let tx = f.region.next_timestamp();
        assert!(f.delegate.put_from_load(&session, &2, value("v"), tx, None, false).unwrap());
    }

    #[test_log::test]
    fn test_evict_all_fails_while_key_locked_for_put() {
        let f = fixture();
        let session = Session::new("t1");
        let tx = f.region.next_timestamp();
        f.delegate.get(&session, &1, tx).unwrap();
        f.delegate.get(&session, &2, tx).unwrap();
        f.store.put(3, CacheValue::Value(value("v"))).unwrap();

        let lock = f.validator.acquire_put_from_load_lock(&1, &"t1").unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let err = f.delegate.evict_all().unwrap_err();
                assert_eq!(err.kind(), ErrorKind::InvalidationFailed);
            });
        });
        f.validator.release_put_from_load_lock(lock);

        // The pending put of the unlocked key was completed anyway.
        assert!(!f.delegate.put_from_load(&session, &2, value("v"), tx, None, false).unwrap());
        assert_eq!(f.delegate.get(&session, &3, tx).unwrap(), Some(value("v")));
    }

    #[test_log::test]
    fn test_evict() {
        let f = fixture();
        let loader = Session::new("t1");
        let tx = f.region.next_timestamp();
        f.store.put(1, CacheValue::Value(value("v"))).unwrap();
        f.delegate.evict(&1).unwrap();
        assert!(!f.store.contains(&1).unwrap());

        assert_eq!(f.delegate.get(&loader, &1, tx).unwrap(), None);
        assert!(f.delegate.put_from_load(&loader, &1, value("v"), tx, None, false).unwrap());
    }
}
