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

pub use loadguard_common::{
    clock::{deadline, Clock, ClockRef, ManualClock, SystemClock, Timestamp},
    code::{Key, Owner, Value, Version},
    error::{Error, ErrorKind, Result},
    option::OptionExt,
};
pub use loadguard_validator::{CorrelationId, Invalidator, PutFromLoadLock, PutFromLoadValidator, ValidatorConfig};

pub use crate::{
    broadcast::{Broadcaster, InvalidationBridge, InvalidationMessage, NodeId},
    builder::{CacheRegion, RegionBuilder},
    cluster::{ClusterError, LocalBroadcaster, LocalCluster},
    delegate::{AccessDelegate, RegionAccess, StrictAccessDelegate, TombstoneAccessDelegate, VersionedAccessDelegate},
    region::{AccessStrategy, Region, RegionConfig},
    store::{Compute, ComputeFn, MemoryStore, Store},
    transaction::{Session, Synchronization, Transaction, TransactionStatus},
    values::{
        accepts_versioned_load, natural_order, CacheValue, FutureUpdate, Tombstone, TombstoneUpdate, VersionComparator,
        VersionedEntry,
    },
};
