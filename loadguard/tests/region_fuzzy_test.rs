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

//! Fuzzy test for cache regions under concurrent loads and writes.
//!
//! Every strategy must end up with no cached value that differs from the origin store once the writers are done.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use loadguard::{natural_order, AccessDelegate, AccessStrategy, CacheRegion, MemoryStore, RegionBuilder, Session};
use parking_lot::Mutex;

const KEYS: u64 = 16;

const WRITERS: usize = 4;
const LOADERS: usize = 8;

const WRITES: usize = 400;
const LOADS: usize = 2000;

/// Every n-th write rolls back.
const ROLLBACK_INTERVAL: usize = 7;

const WRITE_WAIT: Duration = Duration::from_micros(50);

const INTERVAL: usize = 100;

type Region = CacheRegion<u64, String, u64, u64>;

#[derive(Debug, Default)]
struct Row {
    version: u64,
    value: String,
}

/// The origin store. A row lock is held for the whole write transaction.
#[derive(Debug)]
struct Origin {
    rows: Vec<Mutex<Row>>,
}

impl Origin {
    fn new() -> Self {
        Self {
            rows: (0..KEYS)
                .map(|key| {
                    Mutex::new(Row {
                        version: 0,
                        value: format!("{key}-0"),
                    })
                })
                .collect(),
        }
    }

    fn read(&self, key: u64) -> (u64, String) {
        let row = self.rows[key as usize].lock();
        (row.version, row.value.clone())
    }
}

fn region(strategy: AccessStrategy) -> Region {
    RegionBuilder::new("fuzzy")
        .with_strategy(strategy)
        .with_version_comparator(natural_order())
        .build(Arc::new(MemoryStore::<u64, String, u64>::default()))
        .unwrap()
}

fn write(region: &Region, origin: &Origin, owners: &AtomicU64, seed: usize) {
    for i in 0..WRITES {
        let key = ((seed * 31 + i * 7) as u64) % KEYS;
        let session = Session::new(owners.fetch_add(1, Ordering::Relaxed));
        let mut row = origin.rows[key as usize].lock();
        let previous = row.version;
        let version = previous + 1;
        let value = format!("{key}-{version}");

        region
            .update(&session, &key, value.clone(), Some(version), Some(previous))
            .unwrap();
        if i % ROLLBACK_INTERVAL == 0 {
            session.rollback().unwrap();
            continue;
        }
        row.version = version;
        row.value = value.clone();
        region
            .after_update(&session, &key, value, Some(version), Some(previous))
            .unwrap();
        session.commit().unwrap();
        drop(row);

        if i % INTERVAL == 0 {
            tracing::info!("writer {seed} wrote {i} rows");
        }
        thread::sleep(WRITE_WAIT);
    }
}

fn load(region: &Region, origin: &Origin, owners: &AtomicU64, seed: usize) {
    let mut cached = 0;
    for i in 0..LOADS {
        let key = ((seed * 17 + i * 5) as u64) % KEYS;
        let session = Session::new(owners.fetch_add(1, Ordering::Relaxed));
        let tx = region.next_timestamp();
        if region.get(&session, &key, tx).unwrap().is_some() {
            continue;
        }
        let (version, value) = origin.read(key);
        if region
            .put_from_load(&session, &key, value, tx, Some(version), false)
            .unwrap()
        {
            cached += 1;
        }
        if i % INTERVAL == 0 {
            tracing::info!("loader {seed} loaded {i} rows, {cached} cached");
        }
    }
}

fn run(strategy: AccessStrategy) {
    let region = region(strategy);
    let origin = Origin::new();
    let owners = AtomicU64::new(0);

    thread::scope(|s| {
        for seed in 0..WRITERS {
            let (region, origin, owners) = (&region, &origin, &owners);
            s.spawn(move || write(region, origin, owners, seed));
        }
        for seed in 0..LOADERS {
            let (region, origin, owners) = (&region, &origin, &owners);
            s.spawn(move || load(region, origin, owners, seed));
        }
    });

    let session = Session::new(u64::MAX);
    for key in 0..KEYS {
        let tx = region.next_timestamp();
        if let Some(value) = region.get(&session, &key, tx).unwrap() {
            assert_eq!(value, origin.read(key).1, "stale value cached for key {key} with {strategy:?}");
        }
    }
}

#[test_log::test]
fn test_strict_concurrent_load_and_write() {
    run(AccessStrategy::Strict);
}

#[test_log::test]
fn test_tombstone_concurrent_load_and_write() {
    run(AccessStrategy::Tombstone);
}

#[test_log::test]
fn test_versioned_concurrent_load_and_write() {
    run(AccessStrategy::Versioned);
}
