// Copyright 2026 snapcache Project Authors
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

//! Shared components and utils for snapcache.

/// Allow enable debug assertions in release profile with feature "strict_assertion".
pub mod assert;
/// Key and value bounds of the cache.
pub mod code;
/// The error type of snapcache.
pub mod error;
/// Hashers.
pub mod hasher;
/// Metrics model and registries.
pub mod metrics;
/// Scoped functional programming extensions.
pub mod scope;
