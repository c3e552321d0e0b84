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
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use loadguard_common::{
    clock::{deadline, ClockRef, Timestamp},
    code::{Key, Owner},
    error::Result,
};
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

use crate::{
    config::ValidatorConfig,
    pending::{CorrelationId, Invalidator, KeyState, PendingPut},
    registry::{PendingPutMap, PendingPutRegistry},
};

type KeyGuard<O> = ArcMutexGuard<RawMutex, KeyState<O>>;

/// Permission to write a loaded value into the cache.
///
/// The key lock is held for as long as the token lives, which keeps invalidations of the key out until the write is
/// done. Hand it back with [`PutFromLoadValidator::release_put_from_load_lock`] so that exhausted bookkeeping can be
/// collected. Dropping it only unlocks the key.
///
/// The token must be released on the thread that acquired it.
pub struct PutFromLoadLock<K, O>
where
    K: Key,
    O: Owner,
{
    key: K,
    guard: KeyGuard<O>,
}

impl<K, O> Debug for PutFromLoadLock<K, O>
where
    K: Key,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutFromLoadLock").field("key", &self.key).finish()
    }
}

impl<K, O> PutFromLoadLock<K, O>
where
    K: Key,
    O: Owner,
{
    /// The key this lock grants the put for.
    pub fn key(&self) -> &K {
        &self.key
    }
}

/// Decides whether a value loaded from the origin store may still be cached.
///
/// A load that misses the cache is expected to:
///
/// 1. call [`register_pending_put`](Self::register_pending_put) before reading the origin store,
/// 2. read the origin store,
/// 3. call [`acquire_put_from_load_lock`](Self::acquire_put_from_load_lock), and cache the value only if a lock is
///    returned,
/// 4. hand the lock back with [`release_put_from_load_lock`](Self::release_put_from_load_lock).
///
/// A write surrounds its modification with [`begin_invalidating_key`](Self::begin_invalidating_key) and
/// [`end_invalidating_key`](Self::end_invalidating_key). Beginning an invalidation completes every pending put of the
/// key under the key lock, so a load registered before the write can never acquire the put lock afterwards.
///
/// A put without a registered pending put is a "naked put". It is only granted if nobody is invalidating the key and
/// the naked put deadline of the key and of the region have passed.
///
/// At most one key lock is held by any call at a time, and every wait for it is bounded.
pub struct PutFromLoadValidator<K, O>
where
    K: Key,
    O: Owner,
{
    name: Arc<str>,
    config: ValidatorConfig,
    clock: ClockRef,
    registry: PendingPutRegistry<K, O>,
    /// Naked puts on keys without bookkeeping are rejected until this timestamp.
    region_naked_put_deadline: AtomicU64,
}

impl<K, O> Debug for PutFromLoadValidator<K, O>
where
    K: Key,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutFromLoadValidator")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field(
                "region_naked_put_deadline",
                &self.region_naked_put_deadline.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl<K, O> PutFromLoadValidator<K, O>
where
    K: Key,
    O: Owner,
{
    /// Create a validator for the region `name`.
    pub fn new(name: impl Into<Arc<str>>, config: ValidatorConfig, clock: ClockRef) -> Result<Self> {
        config.validate()?;
        let registry = PendingPutRegistry::new(config.shards);
        Ok(Self {
            name: name.into(),
            config,
            clock,
            registry,
            region_naked_put_deadline: AtomicU64::new(0),
        })
    }

    /// Name of the region guarded by the validator.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configurations of the validator.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// The clock deadlines are computed with.
    pub fn clock(&self) -> &ClockRef {
        &self.clock
    }

    /// Declare that `owner` is about to read the origin store for `key` and wants to cache the result.
    ///
    /// Must be called before the origin read. If the key is being invalidated, or its lock cannot be taken within
    /// the register bound, nothing is recorded and the later put is treated as a naked put.
    pub fn register_pending_put(&self, key: &K, owner: O) {
        let now = self.clock.now();
        let put = PendingPut::new(owner, now);
        let outdated = now.saturating_sub(self.config.max_pending_put_delay.as_millis() as Timestamp);

        loop {
            let map = match self.registry.get(key) {
                Some(map) => map,
                None => {
                    let fresh = Arc::new(Mutex::new(KeyState::with_put(put.clone())));
                    let map = self.registry.insert_if_absent(key.clone(), fresh.clone());
                    if Arc::ptr_eq(&map, &fresh) {
                        tracing::trace!(region = %self.name, ?key, owner = ?put.owner, "[validator]: pending put registered");
                        return;
                    }
                    map
                }
            };

            let Some(mut state) = map.try_lock_arc_for(self.config.register_lock_timeout) else {
                tracing::debug!(
                    region = %self.name,
                    ?key,
                    timeout = ?self.config.register_lock_timeout,
                    "[validator]: key lock not acquired, pending put is not registered"
                );
                return;
            };
            if state.removed {
                continue;
            }
            if state.is_invalidating() {
                tracing::trace!(region = %self.name, ?key, "[validator]: key is being invalidated, pending put is not registered");
                return;
            }

            let dropped = state.puts.retain(|p| p.registered_at >= outdated);
            if dropped > 0 {
                tracing::debug!(region = %self.name, ?key, dropped, "[validator]: dropped outdated pending puts");
            }
            tracing::trace!(region = %self.name, ?key, owner = ?put.owner, "[validator]: pending put registered");
            state.puts.insert(put);
            return;
        }
    }

    /// Ask for the permission to cache a value `owner` loaded for `key`.
    ///
    /// Returns `None` if the value must not be cached. That includes failing to take the key lock within the put
    /// bound, which is never an error.
    pub fn acquire_put_from_load_lock(&self, key: &K, owner: &O) -> Option<PutFromLoadLock<K, O>> {
        let now = self.clock.now();

        loop {
            let map = match self.registry.get(key) {
                Some(map) => map,
                None => {
                    if !self.region_naked_puts_allowed(now) {
                        tracing::debug!(region = %self.name, ?key, "[validator]: naked put rejected, region was invalidated recently");
                        return None;
                    }
                    // Simulate a registration so that the put goes through the regular lock path.
                    self.registry
                        .insert_if_absent(key.clone(), Arc::new(Mutex::new(KeyState::default())))
                }
            };

            let Some(mut state) = map.try_lock_arc_for(self.config.put_lock_timeout) else {
                tracing::debug!(
                    region = %self.name,
                    ?key,
                    timeout = ?self.config.put_lock_timeout,
                    "[validator]: key lock not acquired, put is skipped"
                );
                return None;
            };
            if state.removed {
                continue;
            }

            let valid = match state.puts.remove(owner) {
                Some(put) => !put.completed,
                None => !state.is_invalidating() && now > state.naked_put_deadline && self.region_naked_puts_allowed(now),
            };

            if !valid {
                tracing::debug!(region = %self.name, ?key, ?owner, "[validator]: put rejected");
                self.collect(key, &mut state, now);
                return None;
            }

            tracing::trace!(region = %self.name, ?key, ?owner, "[validator]: put granted");
            return Some(PutFromLoadLock {
                key: key.clone(),
                guard: state,
            });
        }
    }

    /// Hand back a lock returned by [`acquire_put_from_load_lock`](Self::acquire_put_from_load_lock).
    pub fn release_put_from_load_lock(&self, lock: PutFromLoadLock<K, O>) {
        let PutFromLoadLock { key, mut guard } = lock;
        self.collect(&key, &mut guard, self.clock.now());
        drop(guard);
    }

    /// Start invalidating `key` on behalf of `owner`.
    ///
    /// Every pending put of the key is completed, so none of them may be cached anymore. Until
    /// [`end_invalidating_key`](Self::end_invalidating_key) is called, and for the grace period after the
    /// invalidation began, naked puts for the key are rejected.
    ///
    /// Returns `false` if the key lock could not be taken. The caller must treat it as a failure of the write.
    pub fn begin_invalidating_key(&self, owner: O, key: &K) -> bool {
        self.begin(Invalidator::Local(owner), key)
    }

    /// Stop invalidating `key` on behalf of `owner`.
    ///
    /// Calling it without a matching begin is a no-op returning `true`. Returns `false` if the key lock could not
    /// be taken, the key then stays uncacheable until the invalidator record is removed.
    pub fn end_invalidating_key(&self, owner: O, key: &K) -> bool {
        self.end(Invalidator::Local(owner), key)
    }

    /// Start an invalidation of `key` announced by another node.
    pub fn begin_remote_invalidation(&self, correlation: CorrelationId, key: &K) -> bool {
        self.begin(Invalidator::Remote(correlation), key)
    }

    /// Finish an invalidation of `key` announced by another node.
    pub fn end_remote_invalidation(&self, correlation: CorrelationId, key: &K) -> bool {
        self.end(Invalidator::Remote(correlation), key)
    }

    /// Invalidate the pending puts of `key` without an ongoing write, e.g. on eviction.
    ///
    /// Pending puts are completed and naked puts are rejected for the grace period.
    pub fn invalidate_key(&self, key: &K) -> bool {
        let now = self.clock.now();
        loop {
            let map = self.registry.get_or_insert_default(key);
            let Some(mut state) = map.try_lock_arc_for(self.config.invalidation_lock_timeout) else {
                tracing::warn!(
                    region = %self.name,
                    ?key,
                    timeout = ?self.config.invalidation_lock_timeout,
                    "[validator]: key lock not acquired, key is not invalidated"
                );
                return false;
            };
            if state.removed {
                continue;
            }
            state.puts.complete_all();
            state.naked_put_deadline = state
                .naked_put_deadline
                .max(deadline(now, self.config.naked_put_grace_period));
            tracing::trace!(region = %self.name, ?key, "[validator]: key invalidated");
            return true;
        }
    }

    /// Invalidate every pending put of the region.
    ///
    /// For the grace period, naked puts on keys without bookkeeping are rejected. Every known key is locked in turn
    /// and its pending puts completed. Keys without an ongoing invalidation are dropped from the registry.
    ///
    /// The loop is not atomic: if a key lock cannot be taken the remaining keys are still processed and `false` is
    /// returned, leaving the region partially invalidated.
    pub fn invalidate_region(&self) -> bool {
        let now = self.clock.now();
        self.region_naked_put_deadline
            .fetch_max(deadline(now, self.config.naked_put_grace_period), Ordering::AcqRel);

        let mut ok = true;
        for (key, map) in self.registry.snapshot() {
            let Some(mut state) = map.try_lock_arc_for(self.config.invalidation_lock_timeout) else {
                tracing::warn!(
                    region = %self.name,
                    ?key,
                    timeout = ?self.config.invalidation_lock_timeout,
                    "[validator]: key lock not acquired during region invalidation"
                );
                ok = false;
                continue;
            };
            if state.removed {
                continue;
            }
            state.puts.complete_all();
            if !state.is_invalidating() {
                self.detach(&key, &mut state);
            }
        }

        tracing::debug!(region = %self.name, ok, "[validator]: region invalidated");
        ok
    }

    /// Drop pending puts older than the configured maximum delay.
    ///
    /// Loads may fail between registration and put, leaving their pending put behind. Keys whose lock is contended
    /// are skipped. Returns the number of pending puts dropped.
    pub fn cleanup_outdated_pending_puts(&self) -> usize {
        let now = self.clock.now();
        let outdated = now.saturating_sub(self.config.max_pending_put_delay.as_millis() as Timestamp);

        let mut dropped = 0;
        for (key, map) in self.registry.snapshot() {
            let Some(mut state) = map.try_lock_arc_for(self.config.put_lock_timeout) else {
                continue;
            };
            if state.removed {
                continue;
            }
            dropped += state.puts.retain(|p| p.registered_at >= outdated);
            self.collect(&key, &mut state, now);
        }
        if dropped > 0 {
            tracing::debug!(region = %self.name, dropped, "[validator]: dropped outdated pending puts");
        }
        dropped
    }

    /// Number of pending puts registered in the region, completed ones included.
    ///
    /// Keys whose lock is contended are skipped, so the value is exact only when the region is quiescent.
    pub fn pending_put_count(&self) -> usize {
        self.registry
            .snapshot()
            .into_iter()
            .filter_map(|(_, map)| map.try_lock_for(self.config.put_lock_timeout).map(|s| s.puts.len()))
            .sum()
    }

    /// Number of keys with bookkeeping in the registry.
    pub fn tracked_keys(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` if no pending put and no invalidation is recorded for any key.
    pub fn is_idle(&self) -> bool {
        self.registry.snapshot().into_iter().all(|(_, map)| {
            map.try_lock_for(self.config.put_lock_timeout)
                .is_some_and(|s| s.puts.is_empty() && !s.is_invalidating())
        })
    }

    fn begin(&self, invalidator: Invalidator<O>, key: &K) -> bool {
        let now = self.clock.now();
        loop {
            let map = self.registry.get_or_insert_default(key);
            let Some(mut state) = map.try_lock_arc_for(self.config.invalidation_lock_timeout) else {
                tracing::warn!(
                    region = %self.name,
                    ?key,
                    ?invalidator,
                    timeout = ?self.config.invalidation_lock_timeout,
                    "[validator]: key lock not acquired, invalidation cannot begin"
                );
                return false;
            };
            if state.removed {
                continue;
            }
            state.puts.complete_all();
            state.naked_put_deadline = state
                .naked_put_deadline
                .max(deadline(now, self.config.naked_put_grace_period));
            tracing::trace!(region = %self.name, ?key, ?invalidator, "[validator]: begin invalidating key");
            state.invalidators.insert(invalidator);
            return true;
        }
    }

    fn end(&self, invalidator: Invalidator<O>, key: &K) -> bool {
        let Some(map) = self.registry.get(key) else {
            return true;
        };
        let Some(mut state) = map.try_lock_arc_for(self.config.invalidation_lock_timeout) else {
            tracing::warn!(
                region = %self.name,
                ?key,
                ?invalidator,
                timeout = ?self.config.invalidation_lock_timeout,
                "[validator]: key lock not acquired, invalidation cannot end"
            );
            return false;
        };
        // Detached states never carry invalidators.
        if state.removed {
            return true;
        }
        if state.invalidators.remove(&invalidator) {
            tracing::trace!(region = %self.name, ?key, ?invalidator, "[validator]: end invalidating key");
        }
        self.collect(key, &mut state, self.clock.now());
        true
    }

    fn region_naked_puts_allowed(&self, now: Timestamp) -> bool {
        now > self.region_naked_put_deadline.load(Ordering::Acquire)
    }

    /// Remove an exhausted key state from the registry. The key lock must be held.
    fn collect(&self, key: &K, state: &mut KeyGuard<O>, now: Timestamp) {
        if state.is_collectable(now) {
            self.detach(key, state);
        }
    }

    fn detach(&self, key: &K, state: &mut KeyGuard<O>) {
        let map: &PendingPutMap<O> = ArcMutexGuard::mutex(state);
        if self.registry.remove_if_same(key, map) {
            state.removed = true;
        }
    }
}
