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

use std::{fmt::Debug, hash::Hash};

/// Key trait for the cache region.
///
/// Keys are cloned into the pending put registry and into broadcast messages, so they are expected to be cheap to
/// clone.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + Debug> Key for T {}

/// Value trait for the cache region.
pub trait Value: Send + Sync + 'static + Clone + Debug {}
impl<T: Send + Sync + 'static + Clone + Debug> Value for T {}

/// Opaque identity of the actor performing a load or a write.
///
/// Usually a transaction id or a thread id. The validator only compares and hashes owners.
pub trait Owner: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + Debug> Owner for T {}

/// Application supplied version attached to versioned entries.
///
/// Versions are ordered by an external comparator, not by [`Ord`].
pub trait Version: Send + Sync + 'static + Clone + Debug {}
impl<T: Send + Sync + 'static + Clone + Debug> Version for T {}
