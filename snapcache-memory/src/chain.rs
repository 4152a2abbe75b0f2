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


use std::{fmt::Debug, ops::Deref, sync::Arc};

use arc_swap::ArcSwapOption;
use snapcache_common::strict_assert;

/// An immutable version of a key's value.
///
/// `value` is `None` for a tombstone. `previous` points to the next older version and is only ever cleared, by the
/// pruner, once no live snapshot can reach past this node.
pub struct VersionedValue<V> {
    generation: u64,
    value: Option<V>,
    previous: ArcSwapOption<VersionedValue<V>>,
}

impl<V> VersionedValue<V> {
    pub fn new(generation: u64, value: Option<V>) -> Self {
        Self {
            generation,
            value,
            previous: ArcSwapOption::empty(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

impl<V> Debug for VersionedValue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedValue")
            .field("generation", &self.generation)
            .field("tombstone", &self.is_tombstone())
            .finish()
    }
}

impl<V> Drop for VersionedValue<V> {
    fn drop(&mut self) {
        // Unlink the tail iteratively, recursive drops overflow the stack on long chains.
        let mut next = self.previous.swap(None);
        while let Some(node) = next {
            next = match Arc::into_inner(node) {
                Some(node) => node.previous.swap(None),
                None => None,
            };
        }
    }
}

/// A shared handle to a live value at the generation it was read.
///
/// Holding an entry keeps its version alive even after it has been pruned from the chain.
pub struct Entry<V> {
    node: Arc<VersionedValue<V>>,
}

impl<V> Entry<V> {
    pub(crate) fn new(node: Arc<VersionedValue<V>>) -> Option<Self> {
        if node.is_tombstone() {
            None
        } else {
            Some(Self { node })
        }
    }

    /// The value.
    pub fn value(&self) -> &V {
        match self.node.value() {
            Some(value) => value,
            None => unreachable!("entry never wraps a tombstone"),
        }
    }

    /// The generation that published the value.
    pub fn generation(&self) -> u64 {
        self.node.generation
    }
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<V> Deref for Entry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<V> Debug for Entry<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("generation", &self.generation())
            .field("value", self.value())
            .finish()
    }
}

/// Outcome of pruning one chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPrune {
    /// Versions unlinked from the chain.
    pub reclaimed: usize,
    /// The chain is a single tombstone nobody can observe, the key can be dropped.
    pub removable: bool,
    /// The chain is a single live value, pruning it again is a no-op until the next write.
    pub settled: bool,
}

/// The versions of one key, newest first.
pub struct Chain<V> {
    head: ArcSwapOption<VersionedValue<V>>,
}

impl<V> Debug for Chain<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("versions", &self.versions()).finish()
    }
}

impl<V> Chain<V> {
    pub fn new(node: Arc<VersionedValue<V>>) -> Self {
        Self {
            head: ArcSwapOption::new(Some(node)),
        }
    }

    pub fn head(&self) -> Option<Arc<VersionedValue<V>>> {
        self.head.load_full()
    }

    /// Link a fully built node as the new head.
    ///
    /// Writer only. The node must be newer than the current head and not yet linked anywhere.
    pub fn push(&self, node: Arc<VersionedValue<V>>) {
        let head = self.head.load_full();
        strict_assert!(head.as_ref().is_none_or(|head| head.generation < node.generation));
        strict_assert!(node.previous.load().is_none());
        node.previous.store(head);
        self.head.store(Some(node));
    }

    /// The version visible at `generation`: the newest node not newer than it.
    ///
    /// Tombstones are returned as is.
    pub fn get(&self, generation: u64) -> Option<Arc<VersionedValue<V>>> {
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            if node.generation <= generation {
                return Some(node);
            }
            cursor = node.previous.load_full();
        }
        None
    }

    /// The live value visible at `generation`.
    pub fn entry(&self, generation: u64) -> Option<Entry<V>> {
        self.get(generation).and_then(Entry::new)
    }

    /// The head holds a value, not a tombstone.
    pub fn is_live(&self) -> bool {
        self.head.load().as_ref().is_some_and(|head| !head.is_tombstone())
    }

    /// Generations of the retained versions, newest first.
    pub fn versions(&self) -> Vec<u64> {
        let mut versions = vec![];
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            versions.push(node.generation);
            cursor = node.previous.load_full();
        }
        versions
    }

    /// Drop every version no snapshot at `floor` or newer can observe.
    ///
    /// Keeps all nodes newer than `floor` and the first node not newer than `floor`, whose tail is severed.
    ///
    /// Writer only.
    pub fn prune(&self, floor: u64) -> ChainPrune {
        let Some(head) = self.head.load_full() else {
            return ChainPrune::default();
        };

        let mut cursor = head.clone();
        loop {
            if cursor.generation <= floor {
                let reclaimed = Self::release(cursor.previous.swap(None));
                let single = Arc::ptr_eq(&cursor, &head);
                return ChainPrune {
                    reclaimed,
                    removable: single && cursor.is_tombstone(),
                    settled: single && !cursor.is_tombstone(),
                };
            }
            match cursor.previous.load_full() {
                Some(previous) => cursor = previous,
                None => return ChainPrune::default(),
            }
        }
    }

    /// Count and drop a detached tail.
    fn release(mut tail: Option<Arc<VersionedValue<V>>>) -> usize {
        let mut released = 0;
        while let Some(node) = tail {
            released += 1;
            tail = node.previous.load_full();
        }
        released
    }
}
