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
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Timestamp in milliseconds.
pub type Timestamp = u64;

/// Source of millisecond timestamps.
///
/// Deadlines (naked put grace period, tombstone expiration) and write timestamps are all taken from a [`Clock`].
/// Lock waits are not: they always use real time.
pub trait Clock: Send + Sync + Debug + 'static {
    /// Current time in milliseconds. Never goes backwards.
    fn now(&self) -> Timestamp;
}

/// Shared clock handle.
pub type ClockRef = Arc<dyn Clock>;

/// Wall clock in milliseconds since the unix epoch.
///
/// Wall clocks can step back, so the last observed value is remembered and never undercut.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or_default();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

/// A clock that only moves when told to.
///
/// Used by tests and simulations to step over grace periods without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at `start` milliseconds.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        self.now.fetch_add(duration.as_millis() as Timestamp, Ordering::AcqRel);
    }

    /// Set the clock. Values behind the current time are ignored.
    pub fn set(&self, now: Timestamp) {
        self.now.fetch_max(now, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}

/// Add a duration to a timestamp, saturating at [`Timestamp::MAX`].
pub fn deadline(now: Timestamp, duration: Duration) -> Timestamp {
    now.saturating_add(duration.as_millis().min(Timestamp::MAX as u128) as Timestamp)
}
