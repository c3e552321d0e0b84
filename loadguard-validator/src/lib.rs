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

//! Put-from-load validation for loadguard.
//!
//! The [`PutFromLoadValidator`] keeps per-key bookkeeping of loads that intend to cache their result and of writes
//! that are invalidating a key, and decides for every load whether caching its result is still safe.

mod config;
mod pending;
mod registry;
mod validator;

pub use config::ValidatorConfig;
pub use pending::{CorrelationId, Invalidator};
pub use validator::{PutFromLoadLock, PutFromLoadValidator};
