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


//! A generational snapshot store.
//!
//! One writer at a time publishes batches of changes as numbered generations, any number of readers open
//! snapshots that keep observing the generation they were opened at. Versions no live snapshot can observe are
//! pruned in the background of commits and snapshot releases.
//!
//! ```
//! use snapcache_memory::CacheBuilder;
//!
//! let cache = CacheBuilder::new().build().unwrap();
//!
//! let mut ticket = cache.begin_write().unwrap();
//! ticket.set("k", 1);
//! ticket.commit().unwrap();
//!
//! let snapshot = cache.open_snapshot();
//!
//! let mut ticket = cache.begin_write().unwrap();
//! ticket.set("k", 2);
//! ticket.commit().unwrap();
//!
//! assert_eq!(snapshot.get("k").map(|e| *e), Some(1));
//! assert_eq!(cache.open_snapshot().get("k").map(|e| *e), Some(2));
//! ```

mod cache;
mod chain;
mod clock;
mod prelude;
mod prune;
mod registry;
mod snapshot;
mod table;
mod writer;

pub use prelude::*;
