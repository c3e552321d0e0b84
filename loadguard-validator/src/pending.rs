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

use std::{fmt::Debug, mem};

use hashbrown::{HashMap, HashSet};
use loadguard_common::{clock::Timestamp, code::Owner};
use uuid::Uuid;

/// Identifies one invalidation across the cluster.
pub type CorrelationId = Uuid;

/// Identity of an actor invalidating a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Invalidator<O> {
    /// A local owner between `begin_invalidating_key` and `end_invalidating_key`.
    Local(O),
    /// An invalidation started on another node.
    Remote(CorrelationId),
}

/// One in-flight load that intends to cache its result.
#[derive(Debug, Clone)]
pub(crate) struct PendingPut<O> {
    pub(crate) owner: O,
    pub(crate) registered_at: Timestamp,
    pub(crate) completed: bool,
}

impl<O> PendingPut<O> {
    pub(crate) fn new(owner: O, registered_at: Timestamp) -> Self {
        Self {
            owner,
            registered_at,
            completed: false,
        }
    }
}

/// Pending puts of a key.
///
/// Most keys only ever see one loader at a time, so the first put is kept inline and a map is only allocated on the
/// second insertion.
#[derive(Debug)]
pub(crate) enum PendingPuts<O>
where
    O: Owner,
{
    Empty,
    Single(PendingPut<O>),
    Map(HashMap<O, PendingPut<O>>),
}

impl<O> Default for PendingPuts<O>
where
    O: Owner,
{
    fn default() -> Self {
        Self::Empty
    }
}

impl<O> PendingPuts<O>
where
    O: Owner,
{
    /// Insert a pending put, replacing any earlier one of the same owner.
    pub(crate) fn insert(&mut self, put: PendingPut<O>) {
        match mem::take(self) {
            Self::Empty => *self = Self::Single(put),
            Self::Single(single) if single.owner == put.owner => *self = Self::Single(put),
            Self::Single(single) => {
                let mut map = HashMap::with_capacity(4);
                map.insert(single.owner.clone(), single);
                map.insert(put.owner.clone(), put);
                *self = Self::Map(map);
            }
            Self::Map(mut map) => {
                map.insert(put.owner.clone(), put);
                *self = Self::Map(map);
            }
        }
    }

    pub(crate) fn remove(&mut self, owner: &O) -> Option<PendingPut<O>> {
        if let Self::Map(map) = self {
            return map.remove(owner);
        }
        match mem::take(self) {
            Self::Single(single) if &single.owner == owner => Some(single),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Mark every pending put as completed so that none of them may cache its load.
    pub(crate) fn complete_all(&mut self) {
        match self {
            Self::Empty => {}
            Self::Single(single) => single.completed = true,
            Self::Map(map) => map.values_mut().for_each(|put| put.completed = true),
        }
    }

    /// Keep only the pending puts matching the predicate. Returns how many were dropped.
    pub(crate) fn retain<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&PendingPut<O>) -> bool,
    {
        let before = self.len();
        match self {
            Self::Empty => {}
            Self::Single(single) => {
                if !f(single) {
                    *self = Self::Empty;
                }
            }
            Self::Map(map) => map.retain(|_, put| f(put)),
        }
        before - self.len()
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::Map(map) => map.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Protocol state of a key, always accessed with the key lock held.
#[derive(Debug)]
pub(crate) struct KeyState<O>
where
    O: Owner,
{
    pub(crate) puts: PendingPuts<O>,
    pub(crate) invalidators: HashSet<Invalidator<O>>,
    /// Naked puts are rejected until this timestamp.
    pub(crate) naked_put_deadline: Timestamp,
    /// Set once the state has been detached from the registry. Waiters that observe it must look the key up again.
    pub(crate) removed: bool,
}

impl<O> Default for KeyState<O>
where
    O: Owner,
{
    fn default() -> Self {
        Self {
            puts: PendingPuts::Empty,
            invalidators: HashSet::new(),
            naked_put_deadline: 0,
            removed: false,
        }
    }
}

impl<O> KeyState<O>
where
    O: Owner,
{
    pub(crate) fn with_put(put: PendingPut<O>) -> Self {
        let mut state = Self::default();
        state.puts.insert(put);
        state
    }

    /// The state carries no information anymore and may leave the registry.
    pub(crate) fn is_collectable(&self, now: Timestamp) -> bool {
        self.puts.is_empty() && self.invalidators.is_empty() && now > self.naked_put_deadline
    }

    pub(crate) fn is_invalidating(&self) -> bool {
        !self.invalidators.is_empty()
    }
}
