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

//! Access strategies of a cache region.
//!
//! Every strategy implements [`AccessDelegate`]. The caller drives it from its data access layer: `get` before
//! reading the origin store, `put_from_load` after, and the write operations around writes to the origin store.

mod strict;
mod tombstone;
mod versioned;

use loadguard_common::{
    clock::Timestamp,
    code::{Key, Owner, Value, Version},
    error::Result,
};

pub use self::{strict::StrictAccessDelegate, tombstone::TombstoneAccessDelegate, versioned::VersionedAccessDelegate};
use crate::{region::AccessStrategy, transaction::Session};

/// Operations a data access layer performs against a cache region.
pub trait AccessDelegate<K, V, T, O>: Send + Sync + 'static
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Look up a cached value for a transaction started at `tx_timestamp`.
    ///
    /// A miss may register the session as a pending loader of the key.
    fn get(&self, session: &Session<O>, key: &K, tx_timestamp: Timestamp) -> Result<Option<V>>;

    /// Cache a value loaded from the origin store by a transaction started at `tx_timestamp`.
    ///
    /// Returns `true` if the value has been cached. `false` is a soft miss, not an error.
    fn put_from_load(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        version: Option<T>,
        minimal_put_override: bool,
    ) -> Result<bool>;

    /// Called when an entity is inserted into the origin store. Returns `true` if the cache was written.
    fn insert(&self, session: &Session<O>, key: &K, value: V, version: Option<T>) -> Result<bool>;

    /// Called when an entity is updated in the origin store. Returns `true` if the cache was written.
    fn update(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        current_version: Option<T>,
        previous_version: Option<T>,
    ) -> Result<bool>;

    /// Called after the insert has been flushed to the origin store.
    fn after_insert(&self, session: &Session<O>, key: &K, value: V, version: Option<T>) -> Result<bool>;

    /// Called after the update has been flushed to the origin store.
    fn after_update(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        current_version: Option<T>,
        previous_version: Option<T>,
    ) -> Result<bool>;

    /// Called when an entity is removed from the origin store.
    fn remove(&self, session: &Session<O>, key: &K, version: Option<T>) -> Result<()>;

    /// Called when every entity of the region is removed from the origin store.
    fn remove_all(&self, session: &Session<O>) -> Result<()>;

    /// Release what a write holds on the key. Safe to call more than once.
    fn unlock_item(&self, session: &Session<O>, key: &K) -> Result<()>;

    /// Drop the cached value of a key without touching the origin store.
    fn evict(&self, key: &K) -> Result<()>;

    /// Drop every cached value of the region.
    fn evict_all(&self) -> Result<()>;
}

macro_rules! dispatch {
    ($self:ident, $delegate:ident => $call:expr) => {
        match $self {
            RegionAccess::Strict($delegate) => $call,
            RegionAccess::Tombstone($delegate) => $call,
            RegionAccess::Versioned($delegate) => $call,
        }
    };
}

/// Statically dispatched [`AccessDelegate`] of any strategy.
#[derive(Debug)]
pub enum RegionAccess<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// See [`StrictAccessDelegate`].
    Strict(StrictAccessDelegate<K, V, T, O>),
    /// See [`TombstoneAccessDelegate`].
    Tombstone(TombstoneAccessDelegate<K, V, T, O>),
    /// See [`VersionedAccessDelegate`].
    Versioned(VersionedAccessDelegate<K, V, T, O>),
}

impl<K, V, T, O> RegionAccess<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Strategy of the delegate.
    pub fn strategy(&self) -> AccessStrategy {
        match self {
            RegionAccess::Strict(_) => AccessStrategy::Strict,
            RegionAccess::Tombstone(_) => AccessStrategy::Tombstone,
            RegionAccess::Versioned(_) => AccessStrategy::Versioned,
        }
    }

    /// Drop the local copies of keys written on another node.
    pub(crate) fn on_remote_write(&self, keys: &[K]) -> Result<()> {
        dispatch!(self, d => d.on_remote_write(keys))
    }

    /// Drop every local copy after another node invalidated the region.
    pub(crate) fn on_remote_region_invalidation(&self) -> Result<()> {
        dispatch!(self, d => d.on_remote_region_invalidation())
    }
}

impl<K, V, T, O> AccessDelegate<K, V, T, O> for RegionAccess<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn get(&self, session: &Session<O>, key: &K, tx_timestamp: Timestamp) -> Result<Option<V>> {
        dispatch!(self, d => d.get(session, key, tx_timestamp))
    }

    fn put_from_load(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        tx_timestamp: Timestamp,
        version: Option<T>,
        minimal_put_override: bool,
    ) -> Result<bool> {
        dispatch!(self, d => d.put_from_load(session, key, value, tx_timestamp, version, minimal_put_override))
    }

    fn insert(&self, session: &Session<O>, key: &K, value: V, version: Option<T>) -> Result<bool> {
        dispatch!(self, d => d.insert(session, key, value, version))
    }

    fn update(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        current_version: Option<T>,
        previous_version: Option<T>,
    ) -> Result<bool> {
        dispatch!(self, d => d.update(session, key, value, current_version, previous_version))
    }

    fn after_insert(&self, session: &Session<O>, key: &K, value: V, version: Option<T>) -> Result<bool> {
        dispatch!(self, d => d.after_insert(session, key, value, version))
    }

    fn after_update(
        &self,
        session: &Session<O>,
        key: &K,
        value: V,
        current_version: Option<T>,
        previous_version: Option<T>,
    ) -> Result<bool> {
        dispatch!(self, d => d.after_update(session, key, value, current_version, previous_version))
    }

    fn remove(&self, session: &Session<O>, key: &K, version: Option<T>) -> Result<()> {
        dispatch!(self, d => d.remove(session, key, version))
    }

    fn remove_all(&self, session: &Session<O>) -> Result<()> {
        dispatch!(self, d => d.remove_all(session))
    }

    fn unlock_item(&self, session: &Session<O>, key: &K) -> Result<()> {
        dispatch!(self, d => d.unlock_item(session, key))
    }

    fn evict(&self, key: &K) -> Result<()> {
        dispatch!(self, d => d.evict(key))
    }

    fn evict_all(&self) -> Result<()> {
        dispatch!(self, d => d.evict_all())
    }
}

/// Log a failed fire-and-forget announcement.
fn announced(operation: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(operation, error = %e, "[delegate]: broadcast failed");
    }
}
