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
    borrow::Cow,
    fmt::Debug,
    hash::Hash,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use equivalent::Equivalent;
use parking_lot::Mutex;
use snapcache_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, Result},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry},
};

use crate::{
    chain::Entry,
    clock::Clock,
    prune::{PrunePolicy, PruneReport},
    registry::Registry,
    snapshot::Snapshot,
    table::KeyTable,
    writer::{WriteTicket, WriterState},
};

pub(crate) struct CacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) name: Cow<'static, str>,
    pub(crate) table: KeyTable<K, V, S>,
    pub(crate) clock: Clock,
    pub(crate) registry: Registry,
    pub(crate) writer: Mutex<WriterState<K, S>>,
    pub(crate) policy: PrunePolicy,
    pub(crate) hash_builder: S,
    pub(crate) metrics: Arc<Metrics>,
    /// Versions retained over all chains.
    pub(crate) versions: AtomicUsize,
    /// Floor of the last prune run.
    pub(crate) last_floor: AtomicU64,
}

impl<K, V, S> CacheInner<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) fn get<Q>(&self, key: &Q, generation: u64) -> Option<Entry<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let entry = self.table.chain(key).and_then(|chain| chain.entry(generation));
        match entry {
            Some(_) => self.metrics.hit.increase(1),
            None => self.metrics.miss.increase(1),
        }
        entry
    }

    pub(crate) fn entries(&self, generation: u64) -> Vec<(K, Entry<V>)> {
        let mut entries = vec![];
        self.table.for_each(|key, chain| {
            if let Some(entry) = chain.entry(generation) {
                entries.push((key.clone(), entry));
            }
        });
        entries
    }

    pub(crate) fn is_empty_at(&self, generation: u64) -> bool {
        !self.table.any(|chain| chain.entry(generation).is_some())
    }

    pub(crate) fn on_snapshot_released(&self, generation: u64, last: bool) {
        self.metrics.snapshot_release.increase(1);
        self.metrics.snapshots.decrease(1);

        if !last {
            return;
        }
        tracing::trace!(name = %self.name, generation, "[snapcache]: generation has no more snapshots");

        // Never wait for an active write scope, it prunes on commit anyway.
        if let Some(mut state) = self.writer.try_lock() {
            self.maybe_prune(&mut state);
        }
    }
}

/// Statistics of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// The current generation.
    pub generation: u64,
    /// The oldest generation a live snapshot observes, or the current generation without live snapshots.
    pub floor: u64,
    /// Generations tracked for snapshots.
    pub generations: usize,
    /// Live snapshots.
    pub snapshots: usize,
    /// Keys in the key table, including keys whose removal is not pruned yet.
    pub keys: usize,
    /// Versions retained over all keys.
    pub versions: usize,
}

/// A generational snapshot cache.
///
/// Readers open [`Snapshot`]s for repeatable reads and never block. A single writer at a time stages changes in a
/// [`WriteTicket`] and publishes them atomically as a new generation. Versions no live snapshot can observe any more
/// are reclaimed according to the [`PrunePolicy`].
///
/// The cache is cheap to clone; clones share the same state.
pub struct Cache<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: Arc<CacheInner<K, V, S>>,
}

impl<K, V, S> Clone for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, S> Debug for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("generation", &self.inner.clock.current())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Name of the cache, used as the metrics label.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The prune policy.
    pub fn policy(&self) -> PrunePolicy {
        self.inner.policy
    }

    /// Begin a write scope.
    ///
    /// Fails with [`snapcache_common::error::ErrorKind::WriterBusy`] if another scope is active, including one held
    /// by the calling thread.
    pub fn begin_write(&self) -> Result<WriteTicket<'_, K, V, S>> {
        match self.inner.writer.try_lock() {
            Some(state) => Ok(WriteTicket::new(&self.inner, state)),
            None => {
                self.inner.metrics.writer_busy.increase(1);
                Err(Error::writer_busy())
            }
        }
    }

    /// Begin a write scope, waiting up to `timeout` for the active one to finish.
    pub fn begin_write_timeout(&self, timeout: Duration) -> Result<WriteTicket<'_, K, V, S>> {
        match self.inner.writer.try_lock_for(timeout) {
            Some(state) => Ok(WriteTicket::new(&self.inner, state)),
            None => {
                self.inner.metrics.writer_busy.increase(1);
                Err(Error::writer_busy().with_context("timeout", format!("{timeout:?}")))
            }
        }
    }

    /// Open a snapshot of the current generation.
    pub fn open_snapshot(&self) -> Snapshot<K, V, S> {
        let (generation, genref) = self.inner.registry.acquire(&self.inner.clock);
        self.inner.metrics.snapshot_open.increase(1);
        self.inner.metrics.snapshots.increase(1);
        Snapshot::new(self.inner.clone(), generation, genref)
    }

    /// The newest published generation.
    pub fn current_generation(&self) -> u64 {
        self.inner.clock.current()
    }

    /// The oldest generation a live snapshot observes, or the current generation without live snapshots.
    pub fn oldest_live_generation(&self) -> u64 {
        self.inner.registry.oldest_live_generation(self.inner.clock.current())
    }

    /// Statistics of the cache.
    pub fn statistics(&self) -> Statistics {
        let generation = self.inner.clock.current();
        Statistics {
            generation,
            floor: self.inner.registry.oldest_live_generation(generation),
            generations: self.inner.registry.generations(),
            snapshots: self.inner.registry.snapshots(),
            keys: self.inner.table.len(),
            versions: self.inner.versions.load(Ordering::Relaxed),
        }
    }

    /// Generations of the versions retained for `key`, newest first. For diagnostics.
    pub fn versions<Q>(&self, key: &Q) -> Vec<u64>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner
            .table
            .chain(key)
            .map(|chain| chain.versions())
            .unwrap_or_default()
    }

    /// Prune now, waiting for the active write scope if any.
    pub fn prune(&self) -> PruneReport {
        let mut state = self.inner.writer.lock();
        self.inner.prune_locked(&mut state)
    }

    /// Prune now, unless a write scope is active.
    pub fn try_prune(&self) -> Option<PruneReport> {
        let mut state = self.inner.writer.try_lock()?;
        Some(self.inner.prune_locked(&mut state))
    }
}

/// Builder of a [`Cache`].
pub struct CacheBuilder<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    name: Cow<'static, str>,
    shards: usize,
    hash_builder: S,
    policy: PrunePolicy,
    registry: BoxedRegistry,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Default for CacheBuilder<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V, DefaultHashBuilder>
where
    K: Key,
    V: Value,
{
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            name: "snapcache".into(),
            shards: 8,
            hash_builder: DefaultHashBuilder::default(),
            policy: PrunePolicy::default(),
            registry: Box::new(NoopMetricsRegistry),
            _marker: PhantomData,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Set the name of the cache, used as the metrics label.
    ///
    /// The default value is "snapcache".
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the key table sharding count. Keys are distributed to shards based on their hash.
    ///
    /// Adding a key copies its shard, more shards make it cheaper.
    ///
    /// The default value is 8.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the hash builder of the key table.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<K, V, OS>
    where
        OS: HashBuilder,
    {
        CacheBuilder {
            name: self.name,
            shards: self.shards,
            hash_builder,
            policy: self.policy,
            registry: self.registry,
            _marker: PhantomData,
        }
    }

    /// Set the prune policy.
    ///
    /// The default value is [`PrunePolicy::Eager`].
    pub fn with_prune_policy(mut self, policy: PrunePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the metrics registry.
    ///
    /// The default value is a noop registry.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<Cache<K, V, S>> {
        if self.shards == 0 {
            return Err(Error::config("shards must be greater than 0").with_context("shards", self.shards));
        }

        let metrics = Arc::new(Metrics::new(self.name.clone(), self.registry.as_ref()));
        tracing::debug!(name = %self.name, shards = self.shards, policy = ?self.policy, "[snapcache]: build cache");

        let inner = CacheInner {
            table: KeyTable::new(self.shards, self.hash_builder.clone()),
            clock: Clock::new(),
            registry: Registry::new(metrics.clone()),
            writer: Mutex::new(WriterState::new(self.hash_builder.clone())),
            policy: self.policy,
            hash_builder: self.hash_builder,
            metrics,
            versions: AtomicUsize::new(0),
            last_floor: AtomicU64::new(0),
            name: self.name,
        };
        Ok(Cache { inner: Arc::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicU64},
        mpsc, Barrier,
    };

    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use snapcache_common::{error::ErrorKind, hasher::ModHasher};

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Cache<u64, String>>();
        is_send_sync_static::<Snapshot<u64, String>>();
        is_send_sync_static::<Entry<String>>();
    }

    fn cache(policy: PrunePolicy) -> Cache<u64, String, ModHasher> {
        CacheBuilder::new()
            .with_name("test")
            .with_shards(4)
            .with_hash_builder(ModHasher::default())
            .with_prune_policy(policy)
            .build()
            .unwrap()
    }

    fn commit(cache: &Cache<u64, String, ModHasher>, changes: &[(u64, Option<&str>)]) -> u64 {
        let mut ticket = cache.begin_write().unwrap();
        for (key, value) in changes {
            match value {
                Some(value) => ticket.set(*key, value.to_string()),
                None => ticket.remove(*key),
            }
        }
        ticket.commit().unwrap()
    }

    fn get(snapshot: &Snapshot<u64, String, ModHasher>, key: u64) -> Option<String> {
        snapshot.get(&key).map(|entry| entry.value().clone())
    }

    #[test]
    fn test_missing_returns_none() {
        let cache = cache(PrunePolicy::Manual);
        let s = cache.open_snapshot();
        assert_eq!(s.generation(), 0);
        assert!(s.get(&1).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_deleted_returns_none() {
        let cache = cache(PrunePolicy::Eager);

        assert_eq!(commit(&cache, &[(1, Some("one"))]), 1);
        let s1 = cache.open_snapshot();
        assert_eq!(get(&s1, 1).as_deref(), Some("one"));

        assert_eq!(commit(&cache, &[(1, None)]), 2);
        let s2 = cache.open_snapshot();
        assert!(s2.get(&1).is_none());

        assert_eq!(get(&s1, 1).as_deref(), Some("one"));
    }

    #[test_log::test]
    fn test_reclaim_superseded_version() {
        let cache = cache(PrunePolicy::Manual);

        assert_eq!(commit(&cache, &[(1, Some("A"))]), 1);
        let s1 = cache.open_snapshot();
        assert_eq!(commit(&cache, &[(1, Some("B"))]), 2);
        let s2 = cache.open_snapshot();

        assert_eq!(get(&s1, 1).as_deref(), Some("A"));
        assert_eq!(get(&s2, 1).as_deref(), Some("B"));
        assert_eq!(cache.versions(&1), vec![2, 1]);

        s1.close();
        let report = cache.prune();
        assert_eq!(report, PruneReport {
            floor: 2,
            versions_reclaimed: 1,
            keys_removed: 0,
            generations_retired: 1,
        });
        assert_eq!(cache.versions(&1), vec![2]);

        let s3 = cache.open_snapshot();
        assert_eq!(get(&s3, 1).as_deref(), Some("B"));
        assert!(s3.get(&2).is_none());
        assert_eq!(get(&s2, 1).as_deref(), Some("B"));
    }

    #[test_log::test]
    fn test_eager_prune_on_release() {
        let cache = cache(PrunePolicy::Eager);

        commit(&cache, &[(1, Some("A"))]);
        let s1 = cache.open_snapshot();
        commit(&cache, &[(1, Some("B"))]);
        assert_eq!(cache.versions(&1), vec![2, 1]);

        drop(s1);
        assert_eq!(cache.versions(&1), vec![2]);
        assert_eq!(cache.statistics().versions, 1);
    }

    #[test_log::test]
    fn test_release_never_waits_for_writer() {
        let cache = cache(PrunePolicy::Eager);

        commit(&cache, &[(1, Some("A"))]);
        let s1 = cache.open_snapshot();
        commit(&cache, &[(1, Some("B"))]);

        let mut ticket = cache.begin_write().unwrap();
        ticket.set(2, "two".to_string());
        // The writer lock is held, the release leaves pruning to the commit.
        drop(s1);
        assert_eq!(cache.versions(&1), vec![2, 1]);

        ticket.commit().unwrap();
        assert_eq!(cache.versions(&1), vec![2]);
    }

    #[test]
    fn test_collect_values() {
        let cache = cache(PrunePolicy::Manual);

        // Repeated sets in one scope keep one version.
        let mut ticket = cache.begin_write().unwrap();
        ticket.set(1, "one".to_string());
        ticket.set(1, "one".to_string());
        ticket.set(1, "uno".to_string());
        assert_eq!(ticket.len(), 1);
        assert_eq!(ticket.commit().unwrap(), 1);
        assert_eq!(cache.versions(&1), vec![1]);

        let s1 = cache.open_snapshot();
        commit(&cache, &[(1, Some("one"))]);
        let s2 = cache.open_snapshot();
        commit(&cache, &[(1, Some("uno"))]);
        assert_eq!(cache.versions(&1), vec![3, 2, 1]);

        // Nothing to collect.
        let report = cache.prune();
        assert_eq!(report.floor, 1);
        assert_eq!(report.versions_reclaimed, 0);
        assert_eq!(cache.statistics().snapshots, 2);
        assert_eq!(cache.versions(&1), vec![3, 2, 1]);

        drop(s1);
        let report = cache.prune();
        assert_eq!(report.floor, 2);
        assert_eq!(cache.statistics().snapshots, 1);
        assert_eq!(cache.versions(&1), vec![3, 2]);

        drop(s2);
        let report = cache.prune();
        assert_eq!(report.floor, 3);
        assert_eq!(cache.statistics().snapshots, 0);
        assert_eq!(cache.versions(&1), vec![3]);
    }

    #[test]
    fn test_collect_disposed_snapshots_one_at_a_time() {
        let cache = cache(PrunePolicy::Manual);

        commit(&cache, &[(1, Some("one"))]);
        let s1 = cache.open_snapshot();
        commit(&cache, &[(1, Some("two"))]);
        let s2 = cache.open_snapshot();
        commit(&cache, &[(1, Some("three"))]);
        let s3 = cache.open_snapshot();
        assert_eq!(cache.statistics().snapshots, 3);

        s1.close();
        cache.prune();
        assert_eq!(cache.statistics().snapshots, 2);
        assert_eq!(cache.versions(&1).len(), 2);

        s2.close();
        cache.prune();
        assert_eq!(cache.statistics().snapshots, 1);
        assert_eq!(cache.versions(&1).len(), 1);

        s3.close();
        cache.prune();
        assert_eq!(cache.statistics().snapshots, 0);
        assert_eq!(cache.versions(&1).len(), 1);
    }

    #[test]
    fn test_properly_collects() {
        let cache = cache(PrunePolicy::Manual);

        for i in 0..32 {
            commit(&cache, &[(i, Some(&i.to_string()))]);
            cache.open_snapshot().close();
        }

        let stats = cache.statistics();
        assert_eq!(stats.generation, 32);
        assert_eq!(stats.generations, 32);
        assert_eq!(stats.snapshots, 0);

        let report = cache.prune();
        assert_eq!(report.generations_retired, 31);
        let stats = cache.statistics();
        // The idle marker of the current generation is kept for reuse.
        assert_eq!(stats.generations, 1);
        assert_eq!(stats.keys, 32);
        assert_eq!(stats.versions, 32);

        let mut ticket = cache.begin_write().unwrap();
        for i in 0..32 {
            ticket.remove(i);
        }
        ticket.commit().unwrap();
        cache.open_snapshot().close();

        let stats = cache.statistics();
        assert_eq!(stats.keys, 32);
        assert_eq!(stats.versions, 64);

        // Nobody can observe the removed keys any more.
        let report = cache.prune();
        assert_eq!(report.keys_removed, 32);
        assert_eq!(report.versions_reclaimed, 64);
        let stats = cache.statistics();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.versions, 0);
        assert_eq!(stats.generations, 1);
    }

    #[test]
    fn test_eventually_remove_tombstones() {
        let cache = cache(PrunePolicy::Manual);

        commit(&cache, &[(1, Some("one"))]);
        cache.prune();
        assert_eq!(cache.versions(&1), vec![1]);

        let s = cache.open_snapshot();
        assert_eq!(get(&s, 1).as_deref(), Some("one"));

        commit(&cache, &[(1, None)]);
        assert_eq!(cache.versions(&1), vec![2, 1]);

        // Nothing to collect while the snapshot observes "one".
        cache.prune();
        assert_eq!(cache.versions(&1), vec![2, 1]);
        assert_eq!(cache.statistics().keys, 1);

        drop(s);
        let report = cache.prune();
        assert_eq!(report.keys_removed, 1);
        assert_eq!(report.versions_reclaimed, 2);
        assert!(cache.versions(&1).is_empty());
        assert_eq!(cache.statistics().keys, 0);
        assert_eq!(cache.statistics().generations, 0);
    }

    #[test]
    fn test_drop_tombstone_under_open_snapshot() {
        let cache = cache(PrunePolicy::Manual);

        commit(&cache, &[(1, Some("one"))]);
        let s1 = cache.open_snapshot();
        commit(&cache, &[(1, None)]);
        let s2 = cache.open_snapshot();
        commit(&cache, &[(2, Some("two"))]);

        cache.prune();
        assert_eq!(cache.versions(&1), vec![2, 1]);
        assert_eq!(get(&s1, 1).as_deref(), Some("one"));

        drop(s1);
        // Absent and tombstoned read the same at generation 2.
        let report = cache.prune();
        assert_eq!(report.floor, 2);
        assert_eq!(report.keys_removed, 1);
        assert!(cache.versions(&1).is_empty());
        assert!(s2.get(&1).is_none());
        assert!(s2.get(&2).is_none());
        assert_eq!(cache.statistics().keys, 1);
    }

    #[test]
    fn test_snapshot_during_write_scope() {
        let cache = cache(PrunePolicy::Manual);

        commit(&cache, &[(1, Some("one"))]);
        commit(&cache, &[(1, Some("uno"))]);

        let mut ticket = cache.begin_write().unwrap();
        ticket.set(1, "ein".to_string());
        assert_eq!(ticket.generation(), 3);

        let s3 = cache.open_snapshot();
        assert_eq!(s3.generation(), 2);
        assert_eq!(get(&s3, 1).as_deref(), Some("uno"));
        assert_eq!(ticket.get(&1).unwrap().as_str(), "ein");
        assert_eq!(cache.current_generation(), 2);

        ticket.commit().unwrap();

        let s4 = cache.open_snapshot();
        assert_eq!(s4.generation(), 3);
        assert_eq!(get(&s4, 1).as_deref(), Some("ein"));
        assert_eq!(get(&s3, 1).as_deref(), Some("uno"));
    }

    #[test]
    fn test_abort_leaves_state_untouched() {
        let cache = cache(PrunePolicy::Eager);

        commit(&cache, &[(1, Some("one"))]);
        commit(&cache, &[(1, Some("uno"))]);

        let mut ticket = cache.begin_write().unwrap();
        ticket.set(1, "ein".to_string());
        ticket.set(2, "zwei".to_string());
        ticket.abort();

        assert_eq!(cache.current_generation(), 2);
        let s = cache.open_snapshot();
        assert_eq!(s.generation(), 2);
        assert_eq!(get(&s, 1).as_deref(), Some("uno"));
        assert!(s.get(&2).is_none());
        assert!(cache.versions(&2).is_empty());

        // Dropping an uncommitted ticket aborts as well, and the generation is reserved again.
        {
            let mut ticket = cache.begin_write().unwrap();
            assert_eq!(ticket.generation(), 3);
            ticket.set(1, "ein".to_string());
        }
        let ticket = cache.begin_write().unwrap();
        assert_eq!(ticket.generation(), 3);
        drop(ticket);
        assert_eq!(cache.current_generation(), 2);
    }

    #[test]
    fn test_nested_write_is_busy() {
        let cache = cache(PrunePolicy::Manual);
        assert_eq!(cache.open_snapshot().generation(), 0);

        let ticket = cache.begin_write().unwrap();
        assert_eq!(ticket.generation(), 1);

        let e = cache.begin_write().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::WriterBusy);
        assert_eq!(cache.try_prune(), None);
        assert_eq!(cache.open_snapshot().generation(), 0);

        ticket.commit().unwrap();
        assert_eq!(cache.open_snapshot().generation(), 1);
        assert!(cache.try_prune().is_some());
    }

    #[test]
    fn test_begin_write_timeout() {
        let cache = cache(PrunePolicy::Manual);
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut ticket = cache.begin_write().unwrap();
                ticket.set(1, "one".to_string());
                tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                ticket.commit().unwrap();
            });

            rx.recv().unwrap();
            let e = cache.begin_write_timeout(Duration::from_millis(1)).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::WriterBusy);

            let ticket = cache.begin_write_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(ticket.generation(), 2);
            assert_eq!(ticket.get(&1).unwrap().as_str(), "one");
        });
    }

    #[test]
    fn test_entries_stable_per_snapshot() {
        let cache = cache(PrunePolicy::Eager);

        commit(
            &cache,
            &[(1, Some("one")), (2, Some("two")), (3, Some("three")), (4, Some("four"))],
        );

        let sorted = |s: &Snapshot<u64, String, ModHasher>| {
            s.entries()
                .into_iter()
                .map(|(k, e)| (k, e.value().clone()))
                .sorted()
                .collect_vec()
        };

        let s1 = cache.open_snapshot();
        let all = sorted(&s1);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0], (1, "one".to_string()));
        assert_eq!(all[3], (4, "four".to_string()));

        commit(&cache, &[(1, Some("uno")), (3, None)]);
        let s2 = cache.open_snapshot();

        assert_eq!(sorted(&s1), all);
        let all = sorted(&s2);
        assert_eq!(all, vec![
            (1, "uno".to_string()),
            (2, "two".to_string()),
            (4, "four".to_string())
        ]);
    }

    #[test]
    fn test_empty_commit_advances_clock() {
        let cache = cache(PrunePolicy::Eager);
        let s0 = cache.open_snapshot();

        let ticket = cache.begin_write().unwrap();
        assert!(ticket.is_empty());
        assert_eq!(ticket.commit().unwrap(), 1);
        assert_eq!(cache.current_generation(), 1);

        let s1 = cache.open_snapshot();
        assert_eq!(s1.generation(), 1);
        assert_eq!(s0.generation(), 0);
        assert!(s1.is_empty());
    }

    #[test]
    fn test_lagged_prune() {
        let cache = cache(PrunePolicy::Lagged { min_generation_delta: 2 });

        commit(&cache, &[(1, Some("a"))]);
        commit(&cache, &[(1, Some("b"))]);
        assert_eq!(cache.versions(&1), vec![2, 1]);

        // 3 - 0 > 2
        commit(&cache, &[(1, Some("c"))]);
        assert_eq!(cache.versions(&1), vec![3]);

        commit(&cache, &[(1, Some("d"))]);
        commit(&cache, &[(1, Some("e"))]);
        assert_eq!(cache.versions(&1), vec![5, 4, 3]);

        commit(&cache, &[(1, Some("f"))]);
        assert_eq!(cache.versions(&1), vec![6]);
    }

    #[test]
    fn test_manual_prune_policy() {
        let cache = cache(PrunePolicy::Manual);
        for v in ["a", "b", "c"] {
            commit(&cache, &[(1, Some(v))]);
        }
        cache.open_snapshot().close();
        assert_eq!(cache.versions(&1), vec![3, 2, 1]);
        assert_eq!(cache.prune().versions_reclaimed, 2);
    }

    #[test]
    fn test_statistics() {
        let cache = cache(PrunePolicy::Manual);
        assert_eq!(cache.statistics(), Statistics::default());

        commit(&cache, &[(1, Some("a")), (2, Some("b"))]);
        let s1 = cache.open_snapshot();
        let _s1b = cache.open_snapshot();
        commit(&cache, &[(1, None)]);
        let _s2 = cache.open_snapshot();

        assert_eq!(cache.statistics(), Statistics {
            generation: 2,
            floor: 1,
            generations: 2,
            snapshots: 3,
            keys: 2,
            versions: 3,
        });
        assert_eq!(cache.oldest_live_generation(), 1);

        drop(s1);
        assert_eq!(cache.oldest_live_generation(), 1);
        assert_eq!(cache.statistics().snapshots, 2);
    }

    #[test]
    fn test_builder() {
        let e = CacheBuilder::<u64, u64>::new().with_shards(0).build().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Config);

        let cache = CacheBuilder::<String, u64>::default().build().unwrap();
        assert_eq!(cache.name(), "snapcache");
        assert_eq!(cache.policy(), PrunePolicy::Eager);

        let mut ticket = cache.begin_write().unwrap();
        ticket.set("hello".to_string(), 1);
        ticket.commit().unwrap();
        let s = cache.open_snapshot();
        assert_eq!(s.get("hello").map(|e| *e), Some(1));
        assert!(s.contains("hello"));
        assert!(!s.contains("world"));
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_prometheus_metrics() {
        use snapcache_common::metrics::registry::prometheus::PrometheusMetricsRegistry;

        let p8s = PrometheusMetricsRegistry::new(prometheus::Registry::new());
        let cache: Cache<u64, u64> = CacheBuilder::new()
            .with_name("metrics")
            .with_metrics_registry(Box::new(p8s.clone()))
            .build()
            .unwrap();

        let mut ticket = cache.begin_write().unwrap();
        ticket.set(1, 1);
        ticket.commit().unwrap();
        let s = cache.open_snapshot();
        assert!(s.get(&1).is_some());
        assert!(s.get(&2).is_none());
        drop(s);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&p8s.registry().gather())
            .unwrap();
        assert!(text.contains(r#"snapcache_op_total{name="metrics",op="commit"} 1"#));
        assert!(text.contains(r#"snapcache_op_total{name="metrics",op="hit"} 1"#));
        assert!(text.contains(r#"snapcache_op_total{name="metrics",op="miss"} 1"#));
        assert!(text.contains(r#"snapcache_usage{name="metrics",type="snapshots"} 0"#));
    }

    /// Every commit writes one group of keys to the same value, readers check they never see a partial group.
    #[test_log::test]
    fn test_cache_fuzzy() {
        const GROUPS: u64 = 8;
        const GROUP_SIZE: u64 = 16;
        const COMMITS: u64 = 2000;
        const READERS: u64 = 4;

        let cache: Cache<u64, u64, ModHasher> = CacheBuilder::new()
            .with_shards(4)
            .with_hash_builder(ModHasher::default())
            .build()
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(READERS as usize + 1));

        let readers = (0..READERS)
            .map(|i| {
                let cache = cache.clone();
                let stop = stop.clone();
                let reads = reads.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(i);
                    let mut last = 0;
                    barrier.wait();
                    while !stop.load(Ordering::Relaxed) {
                        let snapshot = cache.open_snapshot();
                        let generation = snapshot.generation();
                        assert!(generation >= last);
                        last = generation;

                        let group = rng.random_range(0..GROUPS);
                        let read = || {
                            (group * GROUP_SIZE..(group + 1) * GROUP_SIZE)
                                .map(|key| snapshot.get(&key).map(|e| *e))
                                .collect_vec()
                        };
                        let values = read();
                        assert!(values.iter().all_equal(), "partial batch: {values:?}");
                        assert!(values[0].is_none_or(|v| v <= generation));
                        assert_eq!(read(), values);
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect_vec();

        barrier.wait();
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..COMMITS {
            let mut ticket = cache.begin_write().unwrap();
            let generation = ticket.generation();
            let group = rng.random_range(0..GROUPS);
            let remove = rng.random_bool(0.2);
            for key in group * GROUP_SIZE..(group + 1) * GROUP_SIZE {
                if remove {
                    ticket.remove(key);
                } else {
                    ticket.set(key, generation);
                }
            }
            if rng.random_bool(0.1) {
                ticket.abort();
            } else {
                ticket.commit().unwrap();
            }
        }
        stop.store(true, Ordering::Relaxed);
        readers.into_iter().for_each(|handle| handle.join().unwrap());
        assert!(reads.load(Ordering::Relaxed) > 0);

        cache.prune();
        let stats = cache.statistics();
        assert_eq!(stats.snapshots, 0);
        assert_eq!(stats.floor, stats.generation);
        let retained = (0..GROUPS * GROUP_SIZE).map(|key| cache.versions(&key).len()).sum::<usize>();
        assert_eq!(stats.versions, retained);
        assert_eq!(stats.versions, stats.keys);

        let snapshot = cache.open_snapshot();
        assert_eq!(snapshot.entries().len(), stats.keys);
    }
}
