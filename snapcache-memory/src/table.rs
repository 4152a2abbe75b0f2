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


use std::{hash::Hash, sync::Arc};

use arc_swap::ArcSwap;
use equivalent::Equivalent;
use hashbrown::HashMap;
use itertools::Itertools;
use snapcache_common::code::{HashBuilder, Key, Value};

use crate::chain::{Chain, VersionedValue};

type Map<K, V, S> = HashMap<K, Arc<Chain<V>>, S>;

/// Key to chain mapping, sharded by key hash.
///
/// Each shard is an immutable map published through an [`ArcSwap`]. Readers never lock. The writer pushes new
/// heads onto existing chains in place and replaces a shard map only when keys are added or removed.
pub struct KeyTable<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    shards: Vec<ArcSwap<Map<K, V, S>>>,
    hash_builder: S,
}

impl<K, V, S> KeyTable<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub fn new(shards: usize, hash_builder: S) -> Self {
        let shards = (0..shards)
            .map(|_| ArcSwap::from_pointee(HashMap::with_hasher(hash_builder.clone())))
            .collect_vec();
        Self { shards, hash_builder }
    }

    fn shard<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        self.hash_builder.hash_one(key) as usize % self.shards.len()
    }

    fn group<T>(&self, items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> &K) -> Vec<Vec<T>> {
        let mut groups = (0..self.shards.len()).map(|_| vec![]).collect_vec();
        for item in items {
            let shard = self.shard(key(&item));
            groups[shard].push(item);
        }
        groups
    }

    pub fn chain<Q>(&self, key: &Q) -> Option<Arc<Chain<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.shards[self.shard(key)].load().get(key).cloned()
    }

    /// Link a batch of fully built nodes. Returns the count of keys that got a new chain.
    ///
    /// Writer only. Nodes are not visible to snapshots until their generation is published.
    pub fn publish(&self, batch: impl IntoIterator<Item = (K, Arc<VersionedValue<V>>)>) -> usize {
        let mut inserted = 0;
        for (shard, group) in self.shards.iter().zip_eq(self.group(batch, |(k, _)| k)) {
            if group.is_empty() {
                continue;
            }
            let current = shard.load_full();
            let mut fresh = vec![];
            for (key, node) in group {
                match current.get(&key) {
                    Some(chain) => chain.push(node),
                    None => fresh.push((key, node)),
                }
            }
            if fresh.is_empty() {
                continue;
            }
            inserted += fresh.len();
            let mut map = Map::clone(&current);
            map.extend(fresh.into_iter().map(|(key, node)| (key, Arc::new(Chain::new(node)))));
            shard.store(Arc::new(map));
        }
        inserted
    }

    /// Drop keys from the table. Returns the count of removed keys.
    ///
    /// Writer only.
    pub fn remove(&self, keys: impl IntoIterator<Item = K>) -> usize {
        let mut removed = 0;
        for (shard, group) in self.shards.iter().zip_eq(self.group(keys, |k| k)) {
            if group.is_empty() {
                continue;
            }
            let mut map = Map::clone(&shard.load_full());
            removed += group.iter().filter(|key| map.remove(*key).is_some()).count();
            shard.store(Arc::new(map));
        }
        removed
    }

    /// Count of keys, including keys whose head is an unpruned tombstone.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.load().len()).sum()
    }

    /// Visit every key.
    pub fn for_each(&self, mut f: impl FnMut(&K, &Arc<Chain<V>>)) {
        for shard in self.shards.iter() {
            let map = shard.load_full();
            for (key, chain) in map.iter() {
                f(key, chain);
            }
        }
    }

    /// Returns `true` if any chain matches.
    pub fn any(&self, mut f: impl FnMut(&Arc<Chain<V>>) -> bool) -> bool {
        self.shards.iter().any(|shard| shard.load_full().values().any(&mut f))
    }
}

#[cfg(test)]
mod tests {
    use snapcache_common::{code::DefaultHashBuilder, hasher::ModHasher};

    use super::*;

    fn node(generation: u64, value: Option<u64>) -> Arc<VersionedValue<u64>> {
        Arc::new(VersionedValue::new(generation, value))
    }

    #[test]
    fn test_key_table_publish() {
        let table: KeyTable<u64, u64, ModHasher> = KeyTable::new(4, ModHasher::default());

        let inserted = table.publish((0..8).map(|k| (k, node(1, Some(k)))));
        assert_eq!(inserted, 8);
        assert_eq!(table.len(), 8);
        for shard in table.shards.iter() {
            assert_eq!(shard.load().len(), 2);
        }

        // Existing keys get a new head without replacing the shard map.
        let before = table.shards[1].load_full();
        let inserted = table.publish([(1, node(2, Some(10))), (5, node(2, None))]);
        assert_eq!(inserted, 0);
        assert!(Arc::ptr_eq(&before, &table.shards[1].load_full()));

        let chain = table.chain(&1).unwrap();
        assert_eq!(chain.versions(), vec![2, 1]);
        assert_eq!(*chain.entry(1).unwrap(), 1);
        assert_eq!(*chain.entry(2).unwrap(), 10);
        assert!(!table.chain(&5).unwrap().is_live());
        assert!(table.chain(&42).is_none());
    }

    #[test]
    fn test_key_table_remove() {
        let table: KeyTable<u64, u64, ModHasher> = KeyTable::new(4, ModHasher::default());
        table.publish((0..8).map(|k| (k, node(1, Some(k)))));

        // A reader holding a chain keeps it after removal.
        let held = table.chain(&3).unwrap();
        assert_eq!(table.remove([3, 7, 42]), 2);
        assert_eq!(table.len(), 6);
        assert!(table.chain(&3).is_none());
        assert_eq!(*held.entry(1).unwrap(), 3);

        let mut keys = vec![];
        table.for_each(|k, _| keys.push(*k));
        keys.sort();
        assert_eq!(keys, vec![0, 1, 2, 4, 5, 6]);

        assert!(table.any(|chain| chain.is_live()));
        assert!(!table.any(|chain| chain.versions().len() > 1));
    }

    #[test]
    fn test_key_table_borrowed_lookup() {
        let table: KeyTable<String, u64, DefaultHashBuilder> = KeyTable::new(8, DefaultHashBuilder::default());
        table.publish([("hello".to_string(), node(1, Some(1)))]);
        assert!(table.chain("hello").is_some());
        assert!(table.chain("world").is_none());
    }
}
