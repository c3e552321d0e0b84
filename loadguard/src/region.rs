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

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use loadguard_common::{
    clock::{ClockRef, Timestamp},
    error::{Error, Result},
};
use loadguard_validator::ValidatorConfig;
use serde::{Deserialize, Serialize};

/// How a region keeps cached values consistent with the origin store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStrategy {
    /// Writes lock the key against loads until the transaction completes.
    #[default]
    Strict,
    /// Writes leave tombstones that reject loads started before the write completed.
    Tombstone,
    /// Entries carry versions and the newest version wins.
    Versioned,
}

/// Serializable configuration of a cache region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Name of the region, used in logs and errors.
    pub name: String,
    /// Access strategy.
    pub strategy: AccessStrategy,
    /// Put-from-load validator configuration.
    pub validator: ValidatorConfig,
    /// Age after which tombstones stop rejecting loads.
    ///
    /// Default: `60s`.
    pub tombstone_expiration: Duration,
    /// How long an invalidation end received before its begin is remembered.
    ///
    /// Default: `60s`.
    pub ended_correlation_ttl: Duration,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "loadguard".to_string(),
            strategy: AccessStrategy::default(),
            validator: ValidatorConfig::default(),
            tombstone_expiration: Duration::from_secs(60),
            ended_correlation_ttl: Duration::from_secs(60),
        }
    }
}

impl RegionConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        self.validator.validate()?;
        if self.tombstone_expiration.is_zero() {
            return Err(Error::config("tombstones must outlive their write").with_context("region", &self.name));
        }
        if self.ended_correlation_ttl.is_zero() {
            return Err(
                Error::config("ended invalidations must be remembered for a while").with_context("region", &self.name)
            );
        }
        Ok(())
    }
}

/// Region wide timestamps shared by the access delegates of a region.
#[derive(Debug)]
pub struct Region {
    name: Arc<str>,
    clock: ClockRef,
    tombstone_expiration: Duration,
    last_timestamp: AtomicU64,
    last_invalidation: AtomicU64,
}

impl Region {
    /// Create a region.
    pub fn new(name: impl Into<Arc<str>>, clock: ClockRef, tombstone_expiration: Duration) -> Self {
        Self {
            name: name.into(),
            clock,
            tombstone_expiration,
            last_timestamp: AtomicU64::new(0),
            last_invalidation: AtomicU64::new(0),
        }
    }

    /// Name of the region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clock of the region.
    pub fn clock(&self) -> &ClockRef {
        &self.clock
    }

    /// Current time without claiming a timestamp.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Age after which tombstones stop rejecting loads.
    pub fn tombstone_expiration(&self) -> Duration {
        self.tombstone_expiration
    }

    /// Claim a timestamp.
    ///
    /// Timestamps handed out by a region are strictly increasing even if the clock does not move.
    pub fn next_timestamp(&self) -> Timestamp {
        let now = self.clock.now();
        let mut prev = self.last_timestamp.load(Ordering::Acquire);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_timestamp
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => prev = current,
            }
        }
    }

    /// Mark every cached value of the region as stale. Returns the invalidation timestamp.
    pub fn invalidate(&self) -> Timestamp {
        let timestamp = self.next_timestamp();
        self.last_invalidation.fetch_max(timestamp, Ordering::AcqRel);
        tracing::debug!("[region]: region {} invalidated at {timestamp}", self.name);
        timestamp
    }

    /// Timestamp of the latest region invalidation, `0` if there was none.
    pub fn last_invalidation(&self) -> Timestamp {
        self.last_invalidation.load(Ordering::Acquire)
    }

    /// Returns `true` if a transaction started at `tx_timestamp` started after the latest region invalidation.
    pub fn is_valid_for(&self, tx_timestamp: Timestamp) -> bool {
        tx_timestamp > self.last_invalidation()
    }
}
