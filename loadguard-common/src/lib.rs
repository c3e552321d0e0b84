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

//! Shared components for loadguard.

/// Millisecond clocks used for deadlines and write timestamps.
pub mod clock;
/// Trait bounds for keys, values, owners and versions.
pub mod code;
/// The error type shared by all loadguard crates.
pub mod error;
/// Extensions for [`Option`].
pub mod option;
