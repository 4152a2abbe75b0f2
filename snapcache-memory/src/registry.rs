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


use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;
use hashbrown::HashMap;
use parking_lot::Mutex;
use snapcache_common::{metrics::model::Metrics, strict_assert};

use crate::clock::Clock;

/// Set on a generation object with no references once the pruner has claimed it.
const RETIRED: u32 = 1 << 31;

/// A snapshotted generation and the count of snapshots open on it.
#[derive(Debug)]
pub struct GenObj {
    generation: u64,
    refs: AtomicU32,
}

impl GenObj {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            refs: AtomicU32::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire) & !RETIRED
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.refs.load(Ordering::Relaxed);
        loop {
            if current & RETIRED != 0 {
                return false;
            }
            match self
                .refs
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns `true` if the last reference is released.
    fn release(&self) -> bool {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        strict_assert!(previous & !RETIRED > 0 && previous & RETIRED == 0);
        previous == 1
    }

    fn try_retire(&self) -> bool {
        self.refs
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// A reference on a [`GenObj`], released exactly once.
#[derive(Debug)]
pub struct GenRef {
    obj: Option<Arc<GenObj>>,
}

impl GenRef {
    fn new(obj: Arc<GenObj>) -> Self {
        Self { obj: Some(obj) }
    }

    pub fn is_held(&self) -> bool {
        self.obj.is_some()
    }

    /// Release the reference.
    ///
    /// Returns `None` if it has been released before, otherwise whether it was the last reference of its generation.
    pub fn release(&mut self) -> Option<bool> {
        self.obj.take().map(|obj| obj.release())
    }
}

impl Drop for GenRef {
    fn drop(&mut self) {
        self.release();
    }
}

struct Slot {
    obj: Arc<GenObj>,
    older: Option<usize>,
    newer: Option<usize>,
}

/// Tracked generations, oldest to newest, as an arena linked by slot indices.
#[derive(Default)]
struct Generations {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<u64, usize>,
    oldest: Option<usize>,
    newest: Option<usize>,
}

impl Generations {
    fn slot(&self, slot: usize) -> &Slot {
        match self.slots[slot].as_ref() {
            Some(slot) => slot,
            None => unreachable!("linked slot is vacant"),
        }
    }

    fn slot_mut(&mut self, slot: usize) -> &mut Slot {
        match self.slots[slot].as_mut() {
            Some(slot) => slot,
            None => unreachable!("linked slot is vacant"),
        }
    }

    fn push_newest(&mut self, obj: Arc<GenObj>) {
        strict_assert!(self.newest.is_none_or(|newest| self.slot(newest).obj.generation < obj.generation));

        let generation = obj.generation;
        let slot = Slot {
            obj,
            older: self.newest,
            newer: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        match self.newest {
            Some(newest) => self.slot_mut(newest).newer = Some(index),
            None => self.oldest = Some(index),
        }
        self.newest = Some(index);
        self.index.insert(generation, index);
    }

    fn unlink(&mut self, index: usize) -> Arc<GenObj> {
        let slot = match self.slots[index].take() {
            Some(slot) => slot,
            None => unreachable!("unlink a vacant slot"),
        };
        match slot.older {
            Some(older) => self.slot_mut(older).newer = slot.newer,
            None => self.oldest = slot.newer,
        }
        match slot.newer {
            Some(newer) => self.slot_mut(newer).older = slot.older,
            None => self.newest = slot.older,
        }
        self.index.remove(&slot.obj.generation);
        self.free.push(index);
        slot.obj
    }

    fn iter(&self) -> impl Iterator<Item = (usize, &Arc<GenObj>)> + '_ {
        let mut cursor = self.oldest;
        std::iter::from_fn(move || {
            let index = cursor?;
            let slot = self.slot(index);
            cursor = slot.newer;
            Some((index, &slot.obj))
        })
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// Result of a collect pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collected {
    /// No live snapshot observes a generation older than the floor.
    pub floor: u64,
    /// Generations dropped from the registry.
    pub retired: usize,
}

/// Registry of the generations observed by live snapshots.
pub struct Registry {
    generations: Mutex<Generations>,
    /// The most recently tracked generation, for the lock-free open path.
    latest: ArcSwapOption<GenObj>,
    metrics: Arc<Metrics>,
}

impl Registry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            generations: Mutex::new(Generations::default()),
            latest: ArcSwapOption::empty(),
            metrics,
        }
    }

    /// Register a reference on the current generation.
    pub fn acquire(&self, clock: &Clock) -> (u64, GenRef) {
        if let Some(latest) = self.latest.load().as_ref() {
            if latest.generation == clock.current() && latest.try_acquire() {
                return (latest.generation, GenRef::new(latest.clone()));
            }
        }
        self.acquire_slow(clock)
    }

    fn acquire_slow(&self, clock: &Clock) -> (u64, GenRef) {
        let mut generations = self.generations.lock();
        let current = clock.current();

        let obj = match generations.index.get(&current) {
            Some(&index) => generations.slot(index).obj.clone(),
            None => {
                let obj = Arc::new(GenObj::new(current));
                generations.push_newest(obj.clone());
                self.metrics.generations.absolute(generations.len() as _);
                tracing::trace!(generation = current, "[registry]: track generation");
                obj
            }
        };

        // Tracked objects are retired and unlinked in one critical section.
        let acquired = obj.try_acquire();
        strict_assert!(acquired);

        self.latest.store(Some(obj.clone()));
        (current, GenRef::new(obj))
    }

    /// Retire every tracked generation without references, except the marker of `current`, and compute the floor.
    ///
    /// Must be called with the writer lock held, so `current` does not move.
    pub fn collect(&self, current: u64) -> Collected {
        let mut generations = self.generations.lock();

        let mut floor = None;
        let mut retire = vec![];
        for (index, obj) in generations.iter() {
            if obj.generation == current {
                continue;
            }
            if obj.try_retire() {
                retire.push(index);
            } else if floor.is_none() {
                floor = Some(obj.generation);
            }
        }

        for index in retire.iter() {
            let obj = generations.unlink(*index);
            tracing::trace!(generation = obj.generation, "[registry]: retire generation");
        }
        if !retire.is_empty() {
            self.metrics.generations.absolute(generations.len() as _);
        }

        Collected {
            floor: floor.unwrap_or(current),
            retired: retire.len(),
        }
    }

    /// Generation of the oldest tracked generation with references, or `current` if there is none.
    pub fn oldest_live_generation(&self, current: u64) -> u64 {
        self.generations
            .lock()
            .iter()
            .find(|(_, obj)| obj.refs() > 0)
            .map(|(_, obj)| obj.generation)
            .unwrap_or(current)
    }

    /// Count of tracked generations.
    pub fn generations(&self) -> usize {
        self.generations.lock().len()
    }

    /// Count of references over all tracked generations.
    pub fn snapshots(&self) -> usize {
        self.generations
            .lock()
            .iter()
            .map(|(_, obj)| obj.refs() as usize)
            .sum()
    }

    #[cfg(test)]
    fn refs(&self, generation: u64) -> Option<u32> {
        let generations = self.generations.lock();
        generations
            .index
            .get(&generation)
            .map(|index| generations.slot(*index).obj.refs())
    }
}
