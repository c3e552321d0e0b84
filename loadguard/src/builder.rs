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

use std::{fmt::Debug, marker::PhantomData, ops::Deref, sync::Arc, time::Duration};

use loadguard_common::{
    clock::{ClockRef, SystemClock},
    code::{Key, Owner, Value, Version},
    error::{Error, Result},
};
use loadguard_validator::{PutFromLoadValidator, ValidatorConfig};

use crate::{
    broadcast::{Broadcaster, InvalidationBridge, InvalidationMessage},
    delegate::{RegionAccess, StrictAccessDelegate, TombstoneAccessDelegate, VersionedAccessDelegate},
    region::{AccessStrategy, Region, RegionConfig},
    store::Store,
    values::VersionComparator,
};

/// Cache region builder.
pub struct RegionBuilder<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    config: RegionConfig,
    clock: Option<ClockRef>,
    broadcaster: Option<Arc<dyn Broadcaster<K>>>,
    comparator: Option<VersionComparator<T>>,
    _marker: PhantomData<fn() -> (V, O)>,
}

impl<K, V, T, O> RegionBuilder<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Create a builder for a region with the given name and default configurations.
    pub fn new(name: &str) -> Self {
        Self::from_config(RegionConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a builder from a loaded configuration.
    pub fn from_config(config: RegionConfig) -> Self {
        Self {
            config,
            clock: None,
            broadcaster: None,
            comparator: None,
            _marker: PhantomData,
        }
    }

    /// Set the access strategy.
    ///
    /// Default: [`AccessStrategy::Strict`].
    pub fn with_strategy(mut self, strategy: AccessStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Set the put-from-load validator configuration.
    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.config.validator = config;
        self
    }

    /// Set the age after which tombstones stop rejecting loads.
    ///
    /// Default: `60s`.
    pub fn with_tombstone_expiration(mut self, expiration: Duration) -> Self {
        self.config.tombstone_expiration = expiration;
        self
    }

    /// Set how long an invalidation end received before its begin is remembered.
    ///
    /// Default: `60s`.
    pub fn with_ended_correlation_ttl(mut self, ttl: Duration) -> Self {
        self.config.ended_correlation_ttl = ttl;
        self
    }

    /// Set the clock.
    ///
    /// Default: [`SystemClock`].
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Attach the region to a cluster.
    ///
    /// Default: the region is local.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster<K>>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Set the version order. Required by [`AccessStrategy::Versioned`].
    pub fn with_version_comparator(mut self, comparator: VersionComparator<T>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Build the region on top of `store`.
    pub fn build(self, store: Arc<dyn Store<K, V, T>>) -> Result<CacheRegion<K, V, T, O>> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()) as ClockRef);
        let region = Arc::new(Region::new(
            config.name.as_str(),
            clock.clone(),
            config.tombstone_expiration,
        ));
        let validator = Arc::new(PutFromLoadValidator::new(
            config.name.as_str(),
            config.validator.clone(),
            clock,
        )?);
        let bridge = self.broadcaster.map(|broadcaster| {
            Arc::new(InvalidationBridge::new(
                region.clone(),
                validator.clone(),
                broadcaster,
                config.ended_correlation_ttl,
            ))
        });

        let access = match config.strategy {
            AccessStrategy::Strict => RegionAccess::Strict(StrictAccessDelegate::new(
                region.clone(),
                validator.clone(),
                store,
                bridge.clone(),
            )),
            AccessStrategy::Tombstone => {
                RegionAccess::Tombstone(TombstoneAccessDelegate::new(region.clone(), store, bridge.clone()))
            }
            AccessStrategy::Versioned => {
                let Some(comparator) = self.comparator else {
                    return Err(Error::config("versioned regions need a version comparator")
                        .with_context("region", &config.name));
                };
                RegionAccess::Versioned(VersionedAccessDelegate::new(region.clone(), store, comparator))
            }
        };

        tracing::debug!(region = %config.name, strategy = ?config.strategy, clustered = bridge.is_some(), "[region]: built");

        Ok(CacheRegion {
            region,
            validator,
            bridge,
            access,
        })
    }
}

/// A cache region: its access delegate together with the shared state behind it.
///
/// Dereferences to the [`RegionAccess`] of the configured strategy.
pub struct CacheRegion<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    region: Arc<Region>,
    validator: Arc<PutFromLoadValidator<K, O>>,
    bridge: Option<Arc<InvalidationBridge<K, O>>>,
    access: RegionAccess<K, V, T, O>,
}

impl<K, V, T, O> Debug for CacheRegion<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegion")
            .field("region", &self.region)
            .field("access", &self.access)
            .finish()
    }
}

impl<K, V, T, O> Deref for CacheRegion<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    type Target = RegionAccess<K, V, T, O>;

    fn deref(&self) -> &Self::Target {
        &self.access
    }
}

impl<K, V, T, O> CacheRegion<K, V, T, O>
where
    K: Key,
    V: Value,
    T: Version,
    O: Owner,
{
    /// Region wide timestamps.
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Put-from-load validator of the region.
    pub fn validator(&self) -> &Arc<PutFromLoadValidator<K, O>> {
        &self.validator
    }

    /// Cluster bridge, if the region is clustered.
    pub fn bridge(&self) -> Option<&Arc<InvalidationBridge<K, O>>> {
        self.bridge.as_ref()
    }

    /// Claim a timestamp for a transaction about to read the origin store.
    pub fn next_timestamp(&self) -> u64 {
        self.region.next_timestamp()
    }

    /// Apply a message received from another node. Ignored by a local region.
    ///
    /// The validator and region timestamps are updated first, then the local copies of the invalidated keys are
    /// dropped.
    pub fn on_message(&self, message: InvalidationMessage<K>) -> Result<()> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };
        if message.origin() == bridge.node() {
            return Ok(());
        }
        let keys = message.keys().map(<[K]>::to_vec);
        bridge.on_message(message)?;
        match keys {
            Some(keys) => self.access.on_remote_write(&keys),
            None => self.access.on_remote_region_invalidation(),
        }
    }

    /// Periodic housekeeping.
    ///
    /// Drops abandoned pending puts and ends the invalidations of departed nodes. Returns how many entries were
    /// dropped.
    pub fn maintain(&self) -> usize {
        let dropped = self.validator.cleanup_outdated_pending_puts();
        let ended = self.bridge.as_ref().map(|bridge| bridge.refresh_membership()).unwrap_or_default();
        dropped + ended
    }
}

#[cfg(test)]
mod tests {
    use loadguard_common::{clock::ManualClock, error::ErrorKind};

    use super::*;
    use crate::{delegate::AccessDelegate, store::MemoryStore, transaction::Session, values::natural_order};

    type Builder = RegionBuilder<u64, String, u64, &'static str>;

    #[test]
    fn test_build_strategies() {
        let store: Arc<dyn Store<u64, String, u64>> = Arc::new(MemoryStore::<u64, String, u64>::default());
        for strategy in [AccessStrategy::Strict, AccessStrategy::Tombstone, AccessStrategy::Versioned] {
            let region = Builder::new("users")
                .with_strategy(strategy)
                .with_clock(Arc::new(ManualClock::new(1)))
                .with_version_comparator(natural_order())
                .build(store.clone())
                .unwrap();
            assert_eq!(region.strategy(), strategy);
            assert_eq!(region.region().name(), "users");
            assert!(region.bridge().is_none());
        }
    }

    #[test]
    fn test_versioned_requires_comparator() {
        let err = Builder::new("users")
            .with_strategy(AccessStrategy::Versioned)
            .build(Arc::new(MemoryStore::<u64, String, u64>::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_invalid_config() {
        let err = Builder::new("users")
            .with_validator_config(ValidatorConfig::default().with_shards(0))
            .build(Arc::new(MemoryStore::<u64, String, u64>::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_from_config() {
        let config: RegionConfig = serde_json::from_str(
            r#"{ "name": "orders", "strategy": "tombstone", "tombstone_expiration": { "secs": 5, "nanos": 0 } }"#,
        )
        .unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let region = Builder::from_config(config)
            .with_clock(clock.clone())
            .build(Arc::new(MemoryStore::<u64, String, u64>::default()))
            .unwrap();
        assert_eq!(region.strategy(), AccessStrategy::Tombstone);
        assert_eq!(region.region().tombstone_expiration(), Duration::from_secs(5));

        let session = Session::new("t1");
        let tx = region.next_timestamp();
        assert!(region.put_from_load(&session, &1, "v".to_string(), tx, None, false).unwrap());
        assert_eq!(region.get(&session, &1, tx).unwrap(), Some("v".to_string()));
        assert_eq!(region.maintain(), 0);
    }
}
