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


use std::{
    fmt::Debug,
    hash::Hash,
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use equivalent::Equivalent;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use parking_lot::MutexGuard;
use snapcache_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, Result},
};

use crate::{
    cache::CacheInner,
    chain::{Entry, VersionedValue},
};

/// State guarded by the writer lock.
pub(crate) struct WriterState<K, S> {
    /// Keys written since they were last pruned down to a single live version.
    pub(crate) dirty: HashSet<K, S>,
}

impl<K, S> WriterState<K, S>
where
    K: Key,
    S: HashBuilder,
{
    pub(crate) fn new(hash_builder: S) -> Self {
        Self {
            dirty: HashSet::with_hasher(hash_builder),
        }
    }
}

/// An exclusive write scope.
///
/// Every change staged in the scope is published atomically under one new generation by
/// [`WriteTicket::commit`]. Snapshots never observe staged changes.
///
/// Dropping an uncommitted ticket aborts it: nothing is published and the next scope reserves the same generation.
pub struct WriteTicket<'a, K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: &'a CacheInner<K, V, S>,
    state: MutexGuard<'a, WriterState<K, S>>,
    generation: u64,
    staged: HashMap<K, Arc<VersionedValue<V>>, S>,
    failure: Option<Error>,
    completed: bool,
}

impl<K, V, S> Debug for WriteTicket<'_, K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTicket")
            .field("generation", &self.generation)
            .field("staged", &self.staged.len())
            .field("poisoned", &self.failure.is_some())
            .finish()
    }
}

impl<'a, K, V, S> WriteTicket<'a, K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) fn new(inner: &'a CacheInner<K, V, S>, state: MutexGuard<'a, WriterState<K, S>>) -> Self {
        let generation = inner.clock.reserve();
        tracing::trace!(name = %inner.name, generation, "[snapcache]: begin write");
        Self {
            inner,
            state,
            generation,
            staged: HashMap::with_hasher(inner.hash_builder.clone()),
            failure: None,
            completed: false,
        }
    }

    /// The generation the scope publishes on commit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Count of staged changes.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Returns `true` if a value builder failed. A poisoned scope ignores further changes and fails to commit.
    pub fn is_poisoned(&self) -> bool {
        self.failure.is_some()
    }

    fn stage(&mut self, key: K, value: Option<V>) {
        if self.failure.is_some() {
            return;
        }
        self.staged
            .insert(key, Arc::new(VersionedValue::new(self.generation, value)));
    }

    /// Stage a value for `key`. A later change of the same key in this scope replaces it.
    pub fn set(&mut self, key: K, value: V) {
        self.stage(key, Some(value));
    }

    /// Stage the value built by `build`.
    ///
    /// If `build` fails the scope is poisoned and [`WriteTicket::commit`] returns the failure.
    pub fn set_with<E>(&mut self, key: K, build: impl FnOnce() -> std::result::Result<V, E>)
    where
        E: Into<anyhow::Error>,
    {
        if self.failure.is_some() {
            return;
        }
        match build() {
            Ok(value) => self.set(key, value),
            Err(e) => {
                let e = Error::build(self.generation, e);
                tracing::warn!(name = %self.inner.name, generation = self.generation, "[snapcache]: write scope poisoned: {e}");
                self.failure = Some(e);
            }
        }
    }

    /// Stage a removal of `key`.
    ///
    /// A key without a live committed value only loses its staged change.
    pub fn remove(&mut self, key: K) {
        if self.failure.is_some() {
            return;
        }
        if self.inner.table.chain(&key).is_some_and(|chain| chain.is_live()) {
            self.stage(key, None);
        } else {
            self.staged.remove(&key);
        }
    }

    /// Stage a removal of every key with a live committed value, and drop all staged changes.
    pub fn clear(&mut self) {
        if self.failure.is_some() {
            return;
        }
        self.staged.clear();
        let generation = self.generation;
        let staged = &mut self.staged;
        self.inner.table.for_each(|key, chain| {
            if chain.is_live() {
                staged.insert(key.clone(), Arc::new(VersionedValue::new(generation, None)));
            }
        });
    }

    /// Read `key` as this scope would publish it: staged changes over the latest committed state.
    pub fn get<Q>(&self, key: &Q) -> Option<Entry<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.staged.get(key) {
            Some(node) => Entry::new(node.clone()),
            None => self.inner.table.chain(key).and_then(|chain| chain.head()).and_then(Entry::new),
        }
    }

    /// Publish the staged changes as a new generation and return it.
    ///
    /// A scope without changes still publishes a generation.
    pub fn commit(mut self) -> Result<u64> {
        if let Some(e) = self.failure.as_ref() {
            return Err(e.clone());
        }

        let start = Instant::now();
        let generation = self.generation;

        let batch = self.staged.drain().collect_vec();
        let changes = batch.len();
        self.state.dirty.extend(batch.iter().map(|(key, _)| key.clone()));
        let inserted = self.inner.table.publish(batch);
        self.inner.clock.publish(generation);
        self.completed = true;

        let versions = self.inner.versions.fetch_add(changes, Ordering::Relaxed) + changes;
        let metrics = &self.inner.metrics;
        metrics.commit.increase(1);
        metrics.versions.absolute(versions as _);
        metrics.keys.increase(inserted as _);
        metrics.commit_duration.record(start.elapsed().as_secs_f64());

        tracing::debug!(name = %self.inner.name, generation, changes, inserted, "[snapcache]: commit");

        let inner = self.inner;
        inner.maybe_prune(&mut self.state);

        Ok(generation)
    }

    /// Discard the staged changes.
    pub fn abort(self) {
        drop(self);
    }
}

impl<K, V, S> Drop for WriteTicket<'_, K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.inner.metrics.abort.increase(1);
        tracing::debug!(
            name = %self.inner.name,
            generation = self.generation,
            discarded = self.staged.len(),
            poisoned = self.failure.is_some(),
            "[snapcache]: abort"
        );
    }
}
