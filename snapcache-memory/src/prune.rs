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


use std::{sync::atomic::Ordering, time::Instant};

use serde::{Deserialize, Serialize};
use snapcache_common::code::{HashBuilder, Key, Value};

use crate::{cache::CacheInner, registry::Collected, writer::WriterState};

/// Default generation delta of [`PrunePolicy::Lagged`].
pub const DEFAULT_MIN_GENERATION_DELTA: u64 = 8;

/// When the cache reclaims versions on its own.
///
/// [`crate::Cache::prune`] works with every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrunePolicy {
    /// Prune after every commit, and after a snapshot release that leaves its generation without references.
    ///
    /// A release only prunes if no write scope is active, it never waits.
    #[default]
    Eager,
    /// Like [`PrunePolicy::Eager`], but only once the current generation is more than `min_generation_delta` ahead
    /// of the last prune floor.
    Lagged {
        /// Minimal distance between the current generation and the last floor.
        min_generation_delta: u64,
    },
    /// Prune only on [`crate::Cache::prune`].
    Manual,
}

impl PrunePolicy {
    /// [`PrunePolicy::Lagged`] with the default delta.
    pub fn lagged() -> Self {
        Self::Lagged {
            min_generation_delta: DEFAULT_MIN_GENERATION_DELTA,
        }
    }

    pub(crate) fn should_prune(&self, current: u64, last_floor: u64) -> bool {
        match self {
            PrunePolicy::Eager => true,
            PrunePolicy::Lagged { min_generation_delta } => current.saturating_sub(last_floor) > *min_generation_delta,
            PrunePolicy::Manual => false,
        }
    }
}

/// Outcome of a prune run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Oldest generation a live snapshot can observe.
    pub floor: u64,
    /// Versions dropped, including the tombstones of removed keys.
    pub versions_reclaimed: usize,
    /// Keys dropped from the key table.
    pub keys_removed: usize,
    /// Generations dropped from the registry.
    pub generations_retired: usize,
}

impl<K, V, S> CacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) fn maybe_prune(&self, state: &mut WriterState<K, S>) -> Option<PruneReport> {
        if self
            .policy
            .should_prune(self.clock.current(), self.last_floor.load(Ordering::Relaxed))
        {
            Some(self.prune_locked(state))
        } else {
            None
        }
    }

    /// Trim every chain written since its last prune down to what live snapshots can observe.
    pub(crate) fn prune_locked(&self, state: &mut WriterState<K, S>) -> PruneReport {
        let start = Instant::now();

        let current = self.clock.current();
        let Collected { floor, retired } = self.registry.collect(current);

        let mut reclaimed = 0;
        let mut removable = vec![];
        state.dirty.retain(|key| {
            let Some(chain) = self.table.chain(key) else {
                return false;
            };
            let res = chain.prune(floor);
            reclaimed += res.reclaimed;
            if res.removable {
                removable.push(key.clone());
                return false;
            }
            !res.settled
        });
        let keys_removed = if removable.is_empty() {
            0
        } else {
            self.table.remove(removable)
        };
        let released = reclaimed + keys_removed;

        let versions = self.versions.fetch_sub(released, Ordering::Relaxed) - released;
        self.last_floor.store(floor, Ordering::Relaxed);

        self.metrics.prune.increase(1);
        self.metrics.reclaim.increase(released as _);
        self.metrics.key_remove.increase(keys_removed as _);
        self.metrics.versions.absolute(versions as _);
        self.metrics.keys.decrease(keys_removed as _);
        self.metrics.lag.absolute(current - floor);
        self.metrics.prune_duration.record(start.elapsed().as_secs_f64());

        if released > 0 || retired > 0 {
            tracing::debug!(
                name = %self.name,
                current,
                floor,
                reclaimed = released,
                keys_removed,
                retired,
                pending = state.dirty.len(),
                "[snapcache]: prune"
            );
        }

        PruneReport {
            floor,
            versions_reclaimed: released,
            keys_removed,
            generations_retired: retired,
        }
    }
}
