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

//! Values stored in the cache and the rules that merge them.
//!
//! The merge rules are pure functions from the stored value to a [`Compute`] decision. Stores apply them atomically
//! per key with [`Store::compute`](crate::store::Store::compute), so concurrent writers on any node converge to the
//! same value no matter in which order the updates arrive.

use std::{cmp::Ordering, collections::BTreeSet, sync::Arc, time::Duration};

use loadguard_common::clock::{deadline, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Compute;

/// Total order over entity versions.
pub type VersionComparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync + 'static>;

/// Comparator for versions with a natural order.
pub fn natural_order<T>() -> VersionComparator<T>
where
    T: Ord + 'static,
{
    Arc::new(|a: &T, b: &T| a.cmp(b))
}

/// Marker for a key with writes in flight.
///
/// A tombstone without writers is the trace of a finished write. It keeps rejecting loads that started before
/// `last_timestamp` until it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    writers: BTreeSet<Uuid>,
    last_timestamp: Timestamp,
}

impl Tombstone {
    /// A tombstone for one in-flight write.
    pub fn new(writer: Uuid, timestamp: Timestamp) -> Self {
        Self {
            writers: BTreeSet::from([writer]),
            last_timestamp: timestamp,
        }
    }

    /// A tombstone without writers.
    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            writers: BTreeSet::new(),
            last_timestamp: timestamp,
        }
    }

    /// Ids of the writes in flight.
    pub fn writers(&self) -> &BTreeSet<Uuid> {
        &self.writers
    }

    /// Latest timestamp merged into the tombstone.
    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    /// Returns `true` while any write is in flight.
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    /// Returns `true` if `writer` is the only write in flight.
    pub fn is_sole_writer(&self, writer: &Uuid) -> bool {
        self.writers.len() == 1 && self.writers.contains(writer)
    }

    /// Union of the writers, latest timestamp.
    ///
    /// Commutative, associative and idempotent.
    pub fn merge(&self, other: &Tombstone) -> Tombstone {
        Tombstone {
            writers: self.writers.union(&other.writers).copied().collect(),
            last_timestamp: self.last_timestamp.max(other.last_timestamp),
        }
    }

    /// The tombstone once `writer` has completed at `timestamp`.
    pub fn without(&self, writer: &Uuid, timestamp: Timestamp) -> Tombstone {
        let mut writers = self.writers.clone();
        writers.remove(writer);
        Tombstone {
            writers,
            last_timestamp: self.last_timestamp.max(timestamp),
        }
    }

    /// Returns `true` once the tombstone is older than `expiration`.
    ///
    /// Writers whose completion never arrived do not keep the key blocked past expiration.
    pub fn is_expired(&self, now: Timestamp, expiration: Duration) -> bool {
        now >= deadline(self.last_timestamp, expiration)
    }
}

/// A value or removal marker tagged with the entity version it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEntry<V, T> {
    value: Option<V>,
    version: Option<T>,
    timestamp: Timestamp,
}

impl<V, T> VersionedEntry<V, T> {
    /// An entry carrying a value.
    pub fn new(value: V, version: Option<T>, timestamp: Timestamp) -> Self {
        Self {
            value: Some(value),
            version,
            timestamp,
        }
    }

    /// A removal marker.
    pub fn removal(version: Option<T>, timestamp: Timestamp) -> Self {
        Self {
            value: None,
            version,
            timestamp,
        }
    }

    /// The value, `None` for a removal marker.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// The entity version.
    pub fn version(&self) -> Option<&T> {
        self.version.as_ref()
    }

    /// Timestamp of the write or load that produced the entry.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns `true` for a removal marker.
    pub fn is_removal(&self) -> bool {
        self.value.is_none()
    }

    /// Decide whether `self` replaces `existing`.
    ///
    /// The newer version wins and on equal versions a removal beats a value. Anything else is ordered by timestamp,
    /// with a removal winning a tie.
    pub fn supersedes(&self, existing: &VersionedEntry<V, T>, comparator: &VersionComparator<T>) -> bool {
        if let (Some(incoming), Some(current)) = (&self.version, &existing.version) {
            match comparator(incoming, current) {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal if self.is_removal() != existing.is_removal() => return self.is_removal(),
                Ordering::Equal => {}
            }
        }
        match self.timestamp.cmp(&existing.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.is_removal() && !existing.is_removal(),
        }
    }
}

impl<V, T> VersionedEntry<V, T>
where
    V: Clone,
    T: Clone,
{
    /// Merge the entry into the stored value.
    pub fn apply(&self, current: Option<&CacheValue<V, T>>, comparator: &VersionComparator<T>) -> Compute<V, T> {
        match current {
            Some(CacheValue::Versioned(existing)) if !self.supersedes(existing, comparator) => Compute::Keep,
            _ => Compute::Put(CacheValue::Versioned(self.clone())),
        }
    }
}

/// Decide whether a value loaded at `tx_timestamp` with `version` may replace the stored value.
///
/// A loaded value only lands over a strictly older version, or over a removal marker that is older than the load in
/// both time and version.
pub fn accepts_versioned_load<V, T>(
    current: Option<&CacheValue<V, T>>,
    version: Option<&T>,
    tx_timestamp: Timestamp,
    comparator: &VersionComparator<T>,
) -> bool {
    let existing = match current {
        None => return true,
        Some(CacheValue::Versioned(existing)) => existing,
        Some(CacheValue::Value(_)) => return true,
        Some(CacheValue::Tombstone(_) | CacheValue::Future(_)) => return false,
    };
    let newer = match (version, existing.version()) {
        (Some(incoming), Some(current)) => comparator(incoming, current) == Ordering::Greater,
        (None, Some(_)) => false,
        (_, None) => existing.timestamp() < tx_timestamp,
    };
    if existing.is_removal() {
        existing.timestamp() < tx_timestamp && newer
    } else {
        newer
    }
}

/// A value written by a transaction, published before or after it commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureUpdate<V> {
    id: Uuid,
    timestamp: Timestamp,
    value: V,
    committed: bool,
}

impl<V> FutureUpdate<V> {
    /// Id of the write that produced the value.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Timestamp of the update. Completion time once committed.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The written value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns `true` once the writing transaction has committed.
    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

/// Everything a store may hold for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheValue<V, T> {
    /// A plain value.
    Value(V),
    /// Writes in flight, or the trace of a finished write.
    Tombstone(Tombstone),
    /// A value or removal marker with its version.
    Versioned(VersionedEntry<V, T>),
    /// A value written by a transaction.
    Future(FutureUpdate<V>),
}

/// Functional updates of the tombstone protocol.
///
/// Each update is applied to the stored value by [`TombstoneUpdate::apply`]. Updates of different writers commute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TombstoneUpdate<V> {
    /// A write started.
    Begin {
        /// Id of the write.
        writer: Uuid,
        /// Start of the write.
        timestamp: Timestamp,
    },
    /// The write is about to commit with `value`.
    Prepare {
        /// Id of the write.
        writer: Uuid,
        /// Value being written.
        value: V,
    },
    /// The write has completed.
    Complete {
        /// Id of the write.
        writer: Uuid,
        /// Completion time.
        timestamp: Timestamp,
        /// Value written, `None` for a removal.
        value: Option<V>,
        /// Whether the transaction committed.
        committed: bool,
    },
    /// A value loaded from the origin store.
    Load {
        /// Loaded value.
        value: V,
        /// Start of the loading transaction.
        tx_timestamp: Timestamp,
    },
    /// The key has been evicted.
    Evict {
        /// Time of the eviction.
        timestamp: Timestamp,
    },
}

impl<V> TombstoneUpdate<V>
where
    V: Clone,
{
    /// Merge the update into the stored value.
    ///
    /// Tombstones older than `expiration` at `now` are treated as absent.
    pub fn apply<T>(&self, current: Option<&CacheValue<V, T>>, now: Timestamp, expiration: Duration) -> Compute<V, T> {
        match self {
            TombstoneUpdate::Begin { writer, timestamp } => Self::begin(current, *writer, *timestamp, now, expiration),
            TombstoneUpdate::Prepare { writer, value } => match current {
                Some(CacheValue::Tombstone(tombstone)) if tombstone.is_sole_writer(writer) => {
                    Compute::Put(CacheValue::Future(FutureUpdate {
                        id: *writer,
                        timestamp: tombstone.last_timestamp(),
                        value: value.clone(),
                        committed: false,
                    }))
                }
                _ => Compute::Keep,
            },
            TombstoneUpdate::Complete {
                writer,
                timestamp,
                value,
                committed,
            } => Self::complete(current, *writer, *timestamp, value.as_ref(), *committed),
            TombstoneUpdate::Load { value, tx_timestamp } => {
                // Loads never replace a value, only the traces of writes.
                let accept = match current {
                    None => true,
                    Some(CacheValue::Value(_)) | Some(CacheValue::Versioned(_)) => false,
                    Some(CacheValue::Tombstone(tombstone)) => {
                        tombstone.is_expired(now, expiration)
                            || (!tombstone.has_writers() && tombstone.last_timestamp() < *tx_timestamp)
                    }
                    Some(CacheValue::Future(update)) => {
                        (update.committed && update.timestamp < *tx_timestamp)
                            || (!update.committed && now >= deadline(update.timestamp, expiration))
                    }
                };
                if accept {
                    Compute::Put(CacheValue::Value(value.clone()))
                } else {
                    Compute::Keep
                }
            }
            TombstoneUpdate::Evict { timestamp } => {
                let evicted = Tombstone::empty(*timestamp);
                let tombstone = match current {
                    Some(CacheValue::Tombstone(tombstone)) if !tombstone.is_expired(now, expiration) => {
                        tombstone.merge(&evicted)
                    }
                    Some(CacheValue::Future(update)) if !update.committed => {
                        Tombstone::new(update.id, update.timestamp).merge(&evicted)
                    }
                    _ => evicted,
                };
                Compute::Put(CacheValue::Tombstone(tombstone))
            }
        }
    }

    fn begin<T>(
        current: Option<&CacheValue<V, T>>,
        writer: Uuid,
        timestamp: Timestamp,
        now: Timestamp,
        expiration: Duration,
    ) -> Compute<V, T> {
        let started = Tombstone::new(writer, timestamp);
        let tombstone = match current {
            Some(CacheValue::Tombstone(tombstone)) if !tombstone.is_expired(now, expiration) => {
                tombstone.merge(&started)
            }
            Some(CacheValue::Future(update)) if update.id == writer => return Compute::Keep,
            // The other writer is still in flight and loses its prepared value.
            Some(CacheValue::Future(update)) if !update.committed => {
                Tombstone::new(update.id, update.timestamp).merge(&started)
            }
            Some(CacheValue::Future(update)) => Tombstone::empty(update.timestamp).merge(&started),
            _ => started,
        };
        Compute::Put(CacheValue::Tombstone(tombstone))
    }

    fn complete<T>(
        current: Option<&CacheValue<V, T>>,
        writer: Uuid,
        timestamp: Timestamp,
        value: Option<&V>,
        committed: bool,
    ) -> Compute<V, T> {
        match current {
            Some(CacheValue::Future(update)) if update.id == writer && !update.committed => match (committed, value) {
                (true, Some(value)) => Compute::Put(CacheValue::Future(FutureUpdate {
                    id: writer,
                    timestamp: update.timestamp.max(timestamp),
                    value: value.clone(),
                    committed: true,
                })),
                (true, None) => Compute::Put(CacheValue::Tombstone(Tombstone::empty(update.timestamp.max(timestamp)))),
                (false, _) => Compute::Remove,
            },
            Some(CacheValue::Tombstone(tombstone)) if tombstone.writers().contains(&writer) => {
                Compute::Put(CacheValue::Tombstone(tombstone.without(&writer, timestamp)))
            }
            // The trace of the write was invalidated away, loads that saw the old row must still be refused.
            None | Some(CacheValue::Value(_)) => Compute::Put(CacheValue::Tombstone(Tombstone::empty(timestamp))),
            _ => Compute::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const EXPIRATION: Duration = Duration::from_secs(60);

    type Value = CacheValue<&'static str, u64>;

    fn put(compute: Compute<&'static str, u64>) -> Value {
        match compute {
            Compute::Put(value) => value,
            other => panic!("expected put, got {other:?}"),
        }
    }

    fn tombstone(writers: &[Uuid], timestamp: Timestamp) -> Tombstone {
        Tombstone {
            writers: writers.iter().copied().collect(),
            last_timestamp: timestamp,
        }
    }

    fn arb_tombstone() -> impl Strategy<Value = Tombstone> {
        (prop::collection::btree_set(0u128..8, 0..4), 0u64..1000).prop_map(|(ids, ts)| Tombstone {
            writers: ids.into_iter().map(Uuid::from_u128).collect(),
            last_timestamp: ts,
        })
    }

    proptest! {
        #[test]
        fn test_tombstone_merge_commutative(a in arb_tombstone(), b in arb_tombstone()) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
        }

        #[test]
        fn test_tombstone_merge_associative(a in arb_tombstone(), b in arb_tombstone(), c in arb_tombstone()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn test_tombstone_merge_idempotent(a in arb_tombstone()) {
            prop_assert_eq!(a.merge(&a), a);
        }

        #[test]
        fn test_version_order_is_deterministic(v1 in 0u64..100, v2 in 0u64..100, t1 in 0u64..100, t2 in 0u64..100) {
            prop_assume!(v1 != v2);
            let cmp = natural_order::<u64>();
            let a = VersionedEntry::new("a", Some(v1), t1);
            let b = VersionedEntry::new("b", Some(v2), t2);

            let ab = match b.apply(Some(&CacheValue::Versioned(a.clone())), &cmp) {
                Compute::Put(v) => v,
                _ => CacheValue::Versioned(a.clone()),
            };
            let ba = match a.apply(Some(&CacheValue::Versioned(b.clone())), &cmp) {
                Compute::Put(v) => v,
                _ => CacheValue::Versioned(b.clone()),
            };
            prop_assert_eq!(&ab, &ba);
            let winner = if v1 > v2 { a } else { b };
            prop_assert_eq!(ab, CacheValue::Versioned(winner));
        }
    }

    #[test]
    fn test_concurrent_writers_merge() {
        let u1 = Uuid::from_u128(1);
        let u2 = Uuid::from_u128(2);
        let merged = Tombstone::new(u1, 100).merge(&Tombstone::new(u2, 150));
        assert_eq!(merged, tombstone(&[u1, u2], 150));

        let left = merged.without(&u1, 160);
        assert_eq!(left, tombstone(&[u2], 160));
        assert_eq!(left.without(&u2, 170), Tombstone::empty(170));
    }

    #[test]
    fn test_tombstone_expiration() {
        let t = Tombstone::new(Uuid::from_u128(1), 1000);
        assert!(!t.is_expired(1000, EXPIRATION));
        assert!(!t.is_expired(60_999, EXPIRATION));
        assert!(t.is_expired(61_000, EXPIRATION));
    }

    #[test]
    fn test_sole_writer_prepares_future_update() {
        let w = Uuid::from_u128(1);
        let current = put(TombstoneUpdate::Begin { writer: w, timestamp: 100 }.apply(None, 100, EXPIRATION));
        let prepared = put(TombstoneUpdate::Prepare { writer: w, value: "v" }.apply(Some(&current), 110, EXPIRATION));
        assert!(matches!(&prepared, CacheValue::Future(f) if !f.is_committed() && f.timestamp() == 100));

        let completed = put(
            TombstoneUpdate::Complete {
                writer: w,
                timestamp: 120,
                value: Some("v"),
                committed: true,
            }
            .apply(Some(&prepared), 120, EXPIRATION),
        );
        assert!(matches!(&completed, CacheValue::Future(f) if f.is_committed() && f.timestamp() == 120));
    }

    #[test]
    fn test_prepare_with_other_writer_keeps_tombstone() {
        let (u1, u2) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let current: Value = CacheValue::Tombstone(tombstone(&[u1, u2], 150));
        let prepared = TombstoneUpdate::Prepare { writer: u1, value: "v" }.apply(Some(&current), 160, EXPIRATION);
        assert_eq!(prepared, Compute::Keep);

        let completed = put(
            TombstoneUpdate::Complete {
                writer: u1,
                timestamp: 170,
                value: Some("v"),
                committed: true,
            }
            .apply(Some(&current), 170, EXPIRATION),
        );
        assert_eq!(completed, CacheValue::Tombstone(tombstone(&[u2], 170)));
    }

    #[test]
    fn test_rollback_removes_prepared_value() {
        let w = Uuid::from_u128(1);
        let prepared: Value = CacheValue::Future(FutureUpdate {
            id: w,
            timestamp: 100,
            value: "v",
            committed: false,
        });
        let rollback = TombstoneUpdate::Complete {
            writer: w,
            timestamp: 120,
            value: Some("v"),
            committed: false,
        };
        assert_eq!(rollback.apply(Some(&prepared), 120, EXPIRATION), Compute::Remove);
    }

    #[test]
    fn test_committed_removal_leaves_empty_tombstone() {
        let w = Uuid::from_u128(1);
        let current = put(TombstoneUpdate::Begin { writer: w, timestamp: 100 }.apply(None, 100, EXPIRATION));
        let completed = put(
            TombstoneUpdate::Complete {
                writer: w,
                timestamp: 130,
                value: None,
                committed: true,
            }
            .apply(Some(&current), 130, EXPIRATION),
        );
        assert_eq!(completed, CacheValue::Tombstone(Tombstone::empty(130)));
    }

    #[test]
    fn test_complete_over_invalidated_key_leaves_tombstone() {
        let w = Uuid::from_u128(1);
        for committed in [true, false] {
            let complete = TombstoneUpdate::Complete {
                writer: w,
                timestamp: 130,
                value: Some("new"),
                committed,
            };
            assert_eq!(
                put(complete.apply(None, 130, EXPIRATION)),
                CacheValue::Tombstone(Tombstone::empty(130))
            );
            let loaded: Value = CacheValue::Value("old");
            assert_eq!(
                put(complete.apply(Some(&loaded), 130, EXPIRATION)),
                CacheValue::Tombstone(Tombstone::empty(130))
            );
        }
    }

    #[test]
    fn test_load_over_tombstones() {
        let w = Uuid::from_u128(1);
        let load = |tx_timestamp| TombstoneUpdate::Load {
            value: "loaded",
            tx_timestamp,
        };

        let writing: Value = CacheValue::Tombstone(Tombstone::new(w, 100));
        assert_eq!(load(200).apply(Some(&writing), 200, EXPIRATION), Compute::Keep);
        // Writers that never completed stop blocking once expired.
        assert!(matches!(
            load(200).apply(Some(&writing), 100 + 60_000, EXPIRATION),
            Compute::Put(CacheValue::Value("loaded"))
        ));

        let finished: Value = CacheValue::Tombstone(Tombstone::empty(100));
        assert_eq!(load(90).apply(Some(&finished), 200, EXPIRATION), Compute::Keep);
        assert_eq!(load(100).apply(Some(&finished), 200, EXPIRATION), Compute::Keep);
        assert!(matches!(load(101).apply(Some(&finished), 200, EXPIRATION), Compute::Put(_)));
    }

    #[test]
    fn test_load_over_future_updates() {
        let w = Uuid::from_u128(1);
        let committed: Value = CacheValue::Future(FutureUpdate {
            id: w,
            timestamp: 100,
            value: "written",
            committed: true,
        });
        let load = |tx_timestamp| TombstoneUpdate::Load {
            value: "loaded",
            tx_timestamp,
        };
        assert_eq!(load(100).apply(Some(&committed), 200, EXPIRATION), Compute::Keep);
        assert!(matches!(load(150).apply(Some(&committed), 200, EXPIRATION), Compute::Put(_)));

        let uncommitted: Value = CacheValue::Future(FutureUpdate {
            id: w,
            timestamp: 100,
            value: "written",
            committed: false,
        });
        assert_eq!(load(150).apply(Some(&uncommitted), 200, EXPIRATION), Compute::Keep);
    }

    #[test]
    fn test_load_never_replaces_value() {
        let load = TombstoneUpdate::Load {
            value: "stale",
            tx_timestamp: 100,
        };
        assert!(matches!(load.apply::<u64>(None, 200, EXPIRATION), Compute::Put(CacheValue::Value("stale"))));
        let cached: Value = CacheValue::Value("fresh");
        assert_eq!(load.apply(Some(&cached), 200, EXPIRATION), Compute::Keep);
    }

    #[test]
    fn test_begin_over_in_flight_future_update() {
        let (u1, u2) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let prepared: Value = CacheValue::Future(FutureUpdate {
            id: u1,
            timestamp: 100,
            value: "v1",
            committed: false,
        });
        let merged = put(TombstoneUpdate::Begin { writer: u2, timestamp: 150 }.apply(Some(&prepared), 150, EXPIRATION));
        assert_eq!(merged, CacheValue::Tombstone(tombstone(&[u1, u2], 150)));

        // The first writer completes over the tombstone and only drops its id.
        let completed = put(
            TombstoneUpdate::Complete {
                writer: u1,
                timestamp: 160,
                value: Some("v1"),
                committed: true,
            }
            .apply(Some(&merged), 160, EXPIRATION),
        );
        assert_eq!(completed, CacheValue::Tombstone(tombstone(&[u2], 160)));
    }

    #[test]
    fn test_evict_keeps_writers() {
        let w = Uuid::from_u128(1);
        let writing: Value = CacheValue::Tombstone(Tombstone::new(w, 100));
        let evicted = put(TombstoneUpdate::<&str>::Evict { timestamp: 120 }.apply(Some(&writing), 120, EXPIRATION));
        assert_eq!(evicted, CacheValue::Tombstone(tombstone(&[w], 120)));

        let value: Value = CacheValue::Value("v");
        let evicted = put(TombstoneUpdate::<&str>::Evict { timestamp: 130 }.apply(Some(&value), 130, EXPIRATION));
        assert_eq!(evicted, CacheValue::Tombstone(Tombstone::empty(130)));
    }

    #[test]
    fn test_removal_beats_load_of_same_version() {
        let cmp = natural_order::<u64>();
        let removal: VersionedEntry<&str, u64> = VersionedEntry::removal(Some(5), 100);
        let load = VersionedEntry::new("v", Some(5), 200);
        assert!(removal.supersedes(&load, &cmp));
        assert!(!load.supersedes(&removal, &cmp));

        let newer = VersionedEntry::new("v", Some(6), 200);
        assert!(newer.supersedes(&removal, &cmp));
    }

    #[test]
    fn test_unversioned_entries_ordered_by_timestamp() {
        let cmp = natural_order::<u64>();
        let a: VersionedEntry<&str, u64> = VersionedEntry::new("a", None, 100);
        let b = VersionedEntry::new("b", None, 200);
        assert!(b.supersedes(&a, &cmp));
        assert!(!a.supersedes(&b, &cmp));

        let evicted = VersionedEntry::removal(None, 150);
        assert!(evicted.supersedes(&a, &cmp));
        assert!(b.supersedes(&evicted, &cmp));
    }

    #[test]
    fn test_accepts_versioned_load() {
        let cmp = natural_order::<u64>();
        let stored: Value = CacheValue::Versioned(VersionedEntry::new("v", Some(5), 100));
        assert!(!accepts_versioned_load(Some(&stored), Some(&5), 200, &cmp));
        assert!(!accepts_versioned_load(Some(&stored), Some(&4), 200, &cmp));
        assert!(accepts_versioned_load(Some(&stored), Some(&6), 200, &cmp));

        let removed: Value = CacheValue::Versioned(VersionedEntry::removal(Some(5), 100));
        assert!(!accepts_versioned_load(Some(&removed), Some(&6), 100, &cmp));
        assert!(!accepts_versioned_load(Some(&removed), Some(&5), 200, &cmp));
        assert!(accepts_versioned_load(Some(&removed), Some(&6), 200, &cmp));

        let evicted: Value = CacheValue::Versioned(VersionedEntry::removal(None, 100));
        assert!(accepts_versioned_load(Some(&evicted), Some(&1), 101, &cmp));
        assert!(!accepts_versioned_load(Some(&evicted), Some(&1), 99, &cmp));

        assert!(accepts_versioned_load::<&str, u64>(None, Some(&1), 0, &cmp));
    }
}
