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


use std::hash::{BuildHasher, Hash};

/// Key trait for the cache.
///
/// Implemented for every type that satisfies the bounds.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone> Key for T {}

/// Value trait for the cache.
///
/// Values are never cloned by the cache, readers get shared handles to them.
pub trait Value: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Value for T {}

/// Hash builder trait for the key table.
pub trait HashBuilder: BuildHasher + Clone + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Clone + Send + Sync + 'static {}

/// The default hash builder.
pub type DefaultHashBuilder = ahash::RandomState;
