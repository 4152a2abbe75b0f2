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


//! Fuzzy test for snapcache.
//!
//! Writers move amounts between accounts, so every consistent view sums up to the same total.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use itertools::Itertools;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use snapcache::{Cache, CacheBuilder, PrunePolicy};

const ACCOUNTS: u64 = 64;
const BALANCE: u64 = 1000;
const TOTAL: u64 = ACCOUNTS * BALANCE;

const WRITERS: usize = 2;
const READERS: usize = 8;

const TRANSFERS: usize = 2000;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const INTERVAL: usize = 500;

fn setup(policy: PrunePolicy) -> Cache<u64, u64> {
    let cache = CacheBuilder::new()
        .with_name("fuzzy")
        .with_shards(4)
        .with_prune_policy(policy)
        .build()
        .unwrap();
    let mut ticket = cache.begin_write().unwrap();
    for account in 0..ACCOUNTS {
        ticket.set(account, BALANCE);
    }
    ticket.commit().unwrap();
    cache
}

fn write(cache: Cache<u64, u64>, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    for i in 0..TRANSFERS {
        let mut ticket = cache.begin_write_timeout(WRITE_TIMEOUT).unwrap();
        let from = rng.random_range(0..ACCOUNTS);
        let to = rng.random_range(0..ACCOUNTS);
        if from == to {
            ticket.abort();
            continue;
        }
        let balance = *ticket.get(&from).unwrap();
        let amount = rng.random_range(0..=balance);
        let target = *ticket.get(&to).unwrap();
        ticket.set(from, balance - amount);
        ticket.set(to, target + amount);

        if rng.random_bool(0.05) {
            ticket.abort();
        } else {
            ticket.commit().unwrap();
        }
        if i % INTERVAL == 0 {
            tracing::info!(seed, "{i} transfers");
        }
    }
}

fn read(cache: Cache<u64, u64>, seed: u64, stop: Arc<AtomicBool>, views: Arc<AtomicU64>) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut held = vec![];
    while !stop.load(Ordering::Relaxed) {
        let snapshot = cache.open_snapshot();

        let balances = (0..ACCOUNTS).map(|account| *snapshot.get(&account).unwrap()).collect_vec();
        assert_eq!(balances.iter().sum::<u64>(), TOTAL, "inconsistent view at {}", snapshot.generation());

        let account = rng.random_range(0..ACCOUNTS);
        assert_eq!(*snapshot.get(&account).unwrap(), balances[account as usize]);

        views.fetch_add(1, Ordering::Relaxed);

        // Keep some snapshots around for a while, so pruning has to respect them.
        if rng.random_bool(0.1) {
            held.push(snapshot);
        }
        if held.len() > 4 {
            let snapshot = held.remove(0);
            let sum = snapshot.entries().into_iter().map(|(_, e)| *e).sum::<u64>();
            assert_eq!(sum, TOTAL);
        }
    }
}

fn run(policy: PrunePolicy) {
    let cache = setup(policy);
    let stop = Arc::new(AtomicBool::new(false));
    let views = Arc::new(AtomicU64::new(0));

    let readers: Vec<JoinHandle<()>> = (0..READERS)
        .map(|i| {
            let cache = cache.clone();
            let stop = stop.clone();
            let views = views.clone();
            std::thread::spawn(move || read(cache, i as u64, stop, views))
        })
        .collect();
    let writers: Vec<JoinHandle<()>> = (0..WRITERS)
        .map(|i| {
            let cache = cache.clone();
            std::thread::spawn(move || write(cache, 100 + i as u64))
        })
        .collect();

    for h in writers {
        h.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for h in readers {
        h.join().unwrap();
    }
    assert!(views.load(Ordering::Relaxed) > 0);

    cache.prune();
    let statistics = cache.statistics();
    tracing::info!(?statistics, "done");
    assert_eq!(statistics.snapshots, 0);
    assert_eq!(statistics.keys, ACCOUNTS as usize);
    assert_eq!(statistics.versions, ACCOUNTS as usize);
    assert!(statistics.generations <= 1);
}

#[test_log::test]
fn test_concurrent_transfers_eager() {
    run(PrunePolicy::Eager);
}

#[test_log::test]
fn test_concurrent_transfers_lagged() {
    run(PrunePolicy::lagged());
}

#[test_log::test]
fn test_concurrent_transfers_manual() {
    run(PrunePolicy::Manual);
}
