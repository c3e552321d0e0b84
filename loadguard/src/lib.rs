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

//! loadguard keeps a cache consistent with the origin store it caches when both are read and written concurrently,
//! possibly from several nodes of a cluster.
//!
//! A value read from the origin store is only cached if no write to the same key began after the read started.
//! Three access strategies are provided:
//!
//! - [`AccessStrategy::Strict`] locks the key against loads for the duration of a write.
//! - [`AccessStrategy::Tombstone`] records writers in a mergeable tombstone stored in the cache itself.
//! - [`AccessStrategy::Versioned`] keeps the entry with the newest entity version.
//!
//! A region is assembled with [`RegionBuilder`]. Clustered regions exchange [`InvalidationMessage`]s through a
//! [`Broadcaster`].

mod broadcast;
mod builder;
mod cluster;
mod delegate;
mod region;
mod store;
mod transaction;
mod values;

mod prelude;
pub use prelude::*;
