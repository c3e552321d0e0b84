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

use std::time::Duration;

use loadguard_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configurations for the put-from-load validator.
///
/// The default values are the ones the protocol has been run with in production. None of them carries a semantic
/// meaning of its own, tune them to the latency profile of the origin store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Period after an invalidation during which puts without a registered pending put are rejected.
    ///
    /// Default: `20s`.
    pub naked_put_grace_period: Duration,
    /// Bound of the key lock wait when acquiring the put-from-load lock.
    ///
    /// Failing here only means the loaded value is not cached.
    ///
    /// Default: `100ms`.
    pub put_lock_timeout: Duration,
    /// Bound of the key lock wait when registering a pending put.
    ///
    /// Default: `10s`.
    pub register_lock_timeout: Duration,
    /// Bound of the key lock wait when invalidating a key or a region.
    ///
    /// Failing here aborts the write.
    ///
    /// Default: `60s`.
    pub invalidation_lock_timeout: Duration,
    /// Age after which a pending put that never came back is dropped.
    ///
    /// Default: `120s`.
    pub max_pending_put_delay: Duration,
    /// Shard count of the pending put registry.
    ///
    /// Default: `64`.
    pub shards: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            naked_put_grace_period: Duration::from_secs(20),
            put_lock_timeout: Duration::from_millis(100),
            register_lock_timeout: Duration::from_secs(10),
            invalidation_lock_timeout: Duration::from_secs(60),
            max_pending_put_delay: Duration::from_secs(120),
            shards: 64,
        }
    }
}

impl ValidatorConfig {
    /// Set the naked put grace period.
    pub fn with_naked_put_grace_period(mut self, period: Duration) -> Self {
        self.naked_put_grace_period = period;
        self
    }

    /// Set the lock wait bound of `acquire_put_from_load_lock`.
    pub fn with_put_lock_timeout(mut self, timeout: Duration) -> Self {
        self.put_lock_timeout = timeout;
        self
    }

    /// Set the lock wait bound of `register_pending_put`.
    pub fn with_register_lock_timeout(mut self, timeout: Duration) -> Self {
        self.register_lock_timeout = timeout;
        self
    }

    /// Set the lock wait bound of key and region invalidation.
    pub fn with_invalidation_lock_timeout(mut self, timeout: Duration) -> Self {
        self.invalidation_lock_timeout = timeout;
        self
    }

    /// Set the age after which abandoned pending puts are dropped.
    pub fn with_max_pending_put_delay(mut self, delay: Duration) -> Self {
        self.max_pending_put_delay = delay;
        self
    }

    /// Set the shard count of the pending put registry.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::config("pending put registry needs at least one shard").with_context("shards", 0));
        }
        for (name, timeout) in [
            ("put_lock_timeout", self.put_lock_timeout),
            ("register_lock_timeout", self.register_lock_timeout),
            ("invalidation_lock_timeout", self.invalidation_lock_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::config("lock timeouts must be positive").with_context("field", name));
            }
        }
        if self.max_pending_put_delay <= self.put_lock_timeout {
            return Err(
                Error::config("pending puts would be dropped before their lock can be acquired")
                    .with_context("max_pending_put_delay", format!("{:?}", self.max_pending_put_delay))
                    .with_context("put_lock_timeout", format!("{:?}", self.put_lock_timeout)),
            );
        }
        Ok(())
    }
}
