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

//! Invalidations crossing the nodes of an in-process cluster.

use std::{sync::Arc, time::Duration};

use loadguard::{
    AccessDelegate, AccessStrategy, CacheRegion, InvalidationMessage, LocalBroadcaster, LocalCluster, ManualClock,
    MemoryStore, RegionBuilder, Session, ValidatorConfig,
};

type Region = CacheRegion<u64, String, u64, &'static str>;

struct Node {
    broadcaster: Arc<LocalBroadcaster<u64>>,
    region: Region,
}

impl Node {
    fn join(cluster: &LocalCluster<u64>, clock: &Arc<ManualClock>, strategy: AccessStrategy) -> Self {
        let broadcaster = Arc::new(cluster.join());
        let region = RegionBuilder::new("cluster")
            .with_strategy(strategy)
            .with_clock(clock.clone())
            .with_validator_config(
                ValidatorConfig::default()
                    .with_put_lock_timeout(Duration::from_millis(20))
                    .with_invalidation_lock_timeout(Duration::from_millis(100)),
            )
            .with_broadcaster(broadcaster.clone())
            .build(Arc::new(MemoryStore::<u64, String, u64>::default()))
            .unwrap();
        Self { broadcaster, region }
    }

    fn messages(&self) -> Vec<InvalidationMessage<u64>> {
        self.broadcaster.receive().unwrap()
    }

    /// Apply every message waiting in the inbox.
    fn pump(&self) -> usize {
        let messages = self.messages();
        let count = messages.len();
        for message in messages {
            self.region.on_message(message).unwrap();
        }
        count
    }

    /// Run a complete load of `key` and report whether it was cached.
    fn load(&self, owner: &'static str, key: u64, value: &str) -> bool {
        let session = Session::new(owner);
        let tx = self.region.next_timestamp();
        if self.region.get(&session, &key, tx).unwrap().is_some() {
            return false;
        }
        self.region
            .put_from_load(&session, &key, value.to_string(), tx, None, false)
            .unwrap()
    }
}

fn cluster_of(strategy: AccessStrategy) -> (Arc<ManualClock>, Node, Node) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let cluster = LocalCluster::new();
    let a = Node::join(&cluster, &clock, strategy);
    let b = Node::join(&cluster, &clock, strategy);
    (clock, a, b)
}

fn cluster() -> (Arc<ManualClock>, Node, Node) {
    cluster_of(AccessStrategy::Strict)
}

#[test_log::test]
fn test_remote_write_blocks_loads() {
    let (_, a, b) = cluster();

    let loader = Session::new("l1");
    let tx = b.region.next_timestamp();
    assert_eq!(b.region.get(&loader, &1, tx).unwrap(), None);

    let writer = Session::new("w");
    a.region.update(&writer, &1, "v2".to_string(), None, None).unwrap();
    assert_eq!(b.pump(), 1);
    assert_eq!(b.region.bridge().unwrap().remote_invalidations(), 1);

    // Loads registered before or during the remote write are refused.
    assert!(!b.region.put_from_load(&loader, &1, "v1".to_string(), tx, None, false).unwrap());
    assert!(!b.load("l2", 1, "v1"));

    writer.commit().unwrap();
    assert_eq!(b.pump(), 1);
    assert_eq!(b.region.bridge().unwrap().remote_invalidations(), 0);
    assert!(b.load("l3", 1, "v2"));

    // Nothing came back to the writer.
    assert_eq!(a.pump(), 0);
}

#[test_log::test]
fn test_remote_write_drops_local_copy() {
    let (_, a, b) = cluster();
    assert!(b.load("l1", 1, "v1"));

    let writer = Session::new("w");
    a.region.update(&writer, &1, "v2".to_string(), None, None).unwrap();
    assert_eq!(b.pump(), 1);
    let session = Session::new("l2");
    let tx = b.region.next_timestamp();
    assert_eq!(b.region.get(&session, &1, tx).unwrap(), None);

    writer.commit().unwrap();
    assert_eq!(b.pump(), 1);
    assert!(b.load("l3", 1, "v2"));
}

#[test_log::test]
fn test_end_overtaking_begin() {
    let (_, a, b) = cluster();
    let writer = Session::new("w");
    a.region.remove(&writer, &1, None).unwrap();
    writer.commit().unwrap();

    let mut messages = b.messages();
    assert_eq!(messages.len(), 2);
    messages.reverse();
    for message in messages {
        b.region.on_message(message).unwrap();
    }

    // The late begin does not leave the key invalidated.
    assert_eq!(b.region.bridge().unwrap().remote_invalidations(), 0);
    assert!(b.region.validator().is_idle());
    assert!(b.load("l", 1, "v"));
}

#[test_log::test]
fn test_duplicate_messages_are_harmless() {
    let (_, a, b) = cluster();
    let writer = Session::new("w");
    a.region.update(&writer, &1, "v".to_string(), None, None).unwrap();
    writer.commit().unwrap();

    let messages = b.messages();
    for message in messages.iter().chain(messages.iter()) {
        b.region.on_message(message.clone()).unwrap();
    }
    assert_eq!(b.region.bridge().unwrap().remote_invalidations(), 0);
    assert!(b.load("l", 1, "v"));
}

#[test_log::test]
fn test_departed_writer_releases_keys() {
    let (_, a, b) = cluster();
    let writer = Session::new("w");
    a.region.update(&writer, &1, "v".to_string(), None, None).unwrap();
    b.pump();
    assert!(!b.load("l1", 1, "v"));

    // The writer's node leaves before its transaction completes.
    a.broadcaster.leave();
    assert_eq!(b.region.maintain(), 1);
    assert_eq!(b.region.bridge().unwrap().remote_invalidations(), 0);
    assert!(b.load("l2", 1, "v"));
}

#[test_log::test]
fn test_remote_region_invalidation() {
    let (clock, a, b) = cluster();
    let loader = Session::new("l1");
    let tx = b.region.next_timestamp();
    assert_eq!(b.region.get(&loader, &1, tx).unwrap(), None);

    a.region.evict_all().unwrap();
    assert_eq!(b.pump(), 1);
    assert!(!b.region.put_from_load(&loader, &1, "v".to_string(), tx, None, false).unwrap());

    // Naked puts wait for the grace period, registered loads do not.
    assert!(b.load("l2", 1, "v"));
    let session = Session::new("l3");
    let tx = b.region.next_timestamp();
    assert!(!b.region.put_from_load(&session, &2, "v".to_string(), tx, None, false).unwrap());
    clock.advance(Duration::from_secs(21));
    let tx = b.region.next_timestamp();
    assert!(b.region.put_from_load(&session, &2, "v".to_string(), tx, None, false).unwrap());
}

#[test_log::test]
fn test_remote_write_with_tombstones() {
    let (_, a, b) = cluster_of(AccessStrategy::Tombstone);
    assert!(b.load("l1", 1, "v1"));

    let writer = Session::new("w");
    a.region.update(&writer, &1, "v2".to_string(), None, None).unwrap();
    assert_eq!(b.pump(), 1);
    let loader = Session::new("l2");
    let tx = b.region.next_timestamp();
    assert_eq!(b.region.get(&loader, &1, tx).unwrap(), None);

    // The loader read the old row before the remote commit.
    writer.commit().unwrap();
    assert_eq!(b.pump(), 1);
    assert!(!b.region.put_from_load(&loader, &1, "v1".to_string(), tx, None, false).unwrap());
    assert!(b.load("l3", 1, "v2"));
}

#[test_log::test]
fn test_remote_region_invalidation_with_tombstones() {
    let (_, a, b) = cluster_of(AccessStrategy::Tombstone);
    let loader = Session::new("l1");
    let stale_tx = b.region.next_timestamp();
    assert!(b.load("l2", 2, "v"));

    a.region.evict_all().unwrap();
    assert_eq!(b.pump(), 1);
    assert!(!b.region.put_from_load(&loader, &1, "v".to_string(), stale_tx, None, false).unwrap());

    // The local copies are dropped as well.
    let tx = b.region.next_timestamp();
    assert_eq!(b.region.get(&loader, &2, tx).unwrap(), None);
    assert!(b.region.put_from_load(&loader, &1, "v".to_string(), tx, None, false).unwrap());
}
