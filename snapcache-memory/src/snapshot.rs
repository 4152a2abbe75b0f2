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


use std::{fmt::Debug, hash::Hash, sync::Arc};

use equivalent::Equivalent;
use snapcache_common::{
    code::{DefaultHashBuilder, HashBuilder, Key, Value},
    error::{Error, Result},
};

use crate::{cache::CacheInner, chain::Entry, registry::GenRef};

/// A point-in-time view of the cache.
///
/// Every read through a snapshot observes the state published by its generation, no matter what is committed
/// afterwards. Versions a snapshot can observe are never pruned while it is held.
///
/// A snapshot is released exactly once: by [`Snapshot::release`], [`Snapshot::close`] or on drop.
pub struct Snapshot<K, V, S = DefaultHashBuilder>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    inner: Arc<CacheInner<K, V, S>>,
    generation: u64,
    genref: GenRef,
}

impl<K, V, S> Debug for Snapshot<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.generation)
            .field("released", &self.is_released())
            .finish()
    }
}

impl<K, V, S> Snapshot<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    pub(crate) fn new(inner: Arc<CacheInner<K, V, S>>, generation: u64, genref: GenRef) -> Self {
        Self {
            inner,
            generation,
            genref,
        }
    }

    /// The generation this snapshot observes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` if the snapshot has been released.
    pub fn is_released(&self) -> bool {
        !self.genref.is_held()
    }

    fn check(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::use_after_release(self.generation));
        }
        Ok(())
    }

    fn assert_held(&self) {
        assert!(
            !self.is_released(),
            "snapshot at generation {} used after release",
            self.generation
        );
    }

    /// Get the value of `key` at the snapshot generation.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot has been released. See [`Snapshot::try_get`].
    pub fn get<Q>(&self, key: &Q) -> Option<Entry<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.assert_held();
        self.inner.get(key, self.generation)
    }

    /// Get the value of `key` at the snapshot generation, or fail with
    /// [`snapcache_common::error::ErrorKind::UseAfterRelease`] if the snapshot has been released.
    pub fn try_get<Q>(&self, key: &Q) -> Result<Option<Entry<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.check()?;
        Ok(self.inner.get(key, self.generation))
    }

    /// Returns `true` if `key` has a live value at the snapshot generation.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot has been released.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.get(key).is_some()
    }

    /// All live values at the snapshot generation, in no particular order.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot has been released.
    pub fn entries(&self) -> Vec<(K, Entry<V>)> {
        self.assert_held();
        self.inner.entries(self.generation)
    }

    /// Returns `true` if no key has a live value at the snapshot generation.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot has been released.
    pub fn is_empty(&self) -> bool {
        self.assert_held();
        self.inner.is_empty_at(self.generation)
    }

    /// Release the snapshot. Fails if it has been released before.
    pub fn release(&mut self) -> Result<()> {
        match self.genref.release() {
            Some(last) => {
                self.inner.on_snapshot_released(self.generation, last);
                Ok(())
            }
            None => Err(Error::use_after_release(self.generation)),
        }
    }

    /// Release the snapshot and consume it.
    pub fn close(self) {
        drop(self);
    }
}

impl<K, V, S> Drop for Snapshot<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn drop(&mut self) {
        if let Some(last) = self.genref.release() {
            self.inner.on_snapshot_released(self.generation, last);
        }
    }
}
