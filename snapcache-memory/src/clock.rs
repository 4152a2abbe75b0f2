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


use std::sync::atomic::{AtomicU64, Ordering};

use snapcache_common::strict_assert_eq;

/// The generation clock.
///
/// `current` is the newest published generation. Generation `0` is the empty store.
///
/// Only the holder of the writer lock reserves and publishes generations.
#[derive(Debug, Default)]
pub struct Clock {
    current: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The newest published generation.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// The generation the next commit will publish.
    ///
    /// A reservation that is never published is handed out again.
    pub fn reserve(&self) -> u64 {
        self.current.load(Ordering::Relaxed) + 1
    }

    /// Publish a reserved generation. All nodes linked before are visible to whoever observes it.
    pub fn publish(&self, generation: u64) {
        strict_assert_eq!(generation, self.current.load(Ordering::Relaxed) + 1);
        self.current.store(generation, Ordering::Release);
    }
}
