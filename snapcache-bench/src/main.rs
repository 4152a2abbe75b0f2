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


//! Bench tool for snapcache: one writer publishing batches, many readers on snapshots.

mod analyze;
mod exporter;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use analyze::{analyze, monitor, record, Metrics};
use clap::{Parser, ValueEnum};
use exporter::PrometheusExporter;
use itertools::Itertools;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use snapcache::{BoxedRegistry, Cache, CacheBuilder, NoopMetricsRegistry, PrometheusMetricsRegistry, PrunePolicy};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// (s)
    #[arg(short, long, default_value_t = 60)]
    time: u64,

    /// (s)
    #[arg(long, default_value_t = 2)]
    report_interval: u64,

    /// Writer count. Writers contend for the single write scope.
    #[arg(long, default_value_t = 1)]
    writers: usize,

    /// Reader count.
    #[arg(long, default_value_t = 16)]
    readers: usize,

    /// Key range of writes and reads.
    #[arg(long, default_value_t = 100_000)]
    keys: u64,

    /// Changes per commit.
    #[arg(long, default_value_t = 64)]
    batch: usize,

    /// Ratio of removals among the changes.
    #[arg(long, default_value_t = 0.05)]
    remove_ratio: f64,

    /// Pause between commits of a writer. (us)
    #[arg(long, default_value_t = 0)]
    write_interval: u64,

    /// Gets per snapshot.
    #[arg(long, default_value_t = 16)]
    reads: usize,

    /// How long a reader holds its snapshot after reading. (us)
    #[arg(long, default_value_t = 0)]
    hold: u64,

    /// Value payload size. (B)
    #[arg(long, default_value_t = 64)]
    entry_size: usize,

    #[arg(long, value_enum, default_value_t = Policy::Eager)]
    policy: Policy,

    /// For `--policy lagged` only.
    #[arg(long, default_value_t = snapcache::DEFAULT_MIN_GENERATION_DELTA)]
    lag: u64,

    /// Interval of explicit prunes, `0` disables them. (ms)
    #[arg(long, default_value_t = 0)]
    prune_interval: u64,

    /// Key table shards.
    #[arg(long, default_value_t = 64)]
    shards: usize,

    /// Enable the prometheus exporter.
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[arg(long, default_value = "0.0.0.0:19970")]
    metrics_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Eager,
    Lagged,
    Manual,
}

/// Value stamped with the generation of the commit that wrote it.
#[derive(Debug, Clone)]
pub struct Value {
    generation: u64,
    payload: Vec<u8>,
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
            panic!()
        });
    }

    let args = Args::parse();
    println!("{:#?}", args);
    anyhow::ensure!(args.keys > 0, "\"--keys\" value must be greater than 0");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.remove_ratio),
        "\"--remove-ratio\" value must be in [0, 1]"
    );

    let registry: BoxedRegistry = if args.metrics {
        let registry = prometheus::Registry::new();
        PrometheusExporter::new(registry.clone(), args.metrics_addr).run()?;
        Box::new(PrometheusMetricsRegistry::new(registry))
    } else {
        Box::new(NoopMetricsRegistry)
    };

    let policy = match args.policy {
        Policy::Eager => PrunePolicy::Eager,
        Policy::Lagged => PrunePolicy::Lagged {
            min_generation_delta: args.lag,
        },
        Policy::Manual => PrunePolicy::Manual,
    };

    let cache: Cache<u64, Value> = CacheBuilder::new()
        .with_name("bench")
        .with_shards(args.shards)
        .with_prune_policy(policy)
        .with_metrics_registry(registry)
        .build()?;

    let metrics = Metrics::default();
    let stop = Arc::new(AtomicBool::new(false));

    let handle_monitor = std::thread::spawn({
        let cache = cache.clone();
        let metrics = metrics.clone();
        let stop = stop.clone();
        let interval = Duration::from_secs(args.report_interval);
        move || monitor(cache, interval, metrics, stop)
    });

    let metrics_dump_start = metrics.dump();
    let time = Instant::now();

    let mut handles: Vec<JoinHandle<()>> = vec![];
    handles.extend((0..args.writers).map(|id| {
        let args = args.clone();
        let cache = cache.clone();
        let metrics = metrics.clone();
        let stop = stop.clone();
        std::thread::spawn(move || write(id as u64, args, cache, metrics, stop))
    }));
    handles.extend((0..args.readers).map(|id| {
        let args = args.clone();
        let cache = cache.clone();
        let metrics = metrics.clone();
        let stop = stop.clone();
        std::thread::spawn(move || read(id as u64, args, cache, metrics, stop))
    }));
    if args.prune_interval > 0 {
        let cache = cache.clone();
        let stop = stop.clone();
        let interval = Duration::from_millis(args.prune_interval);
        handles.push(std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if let Some(report) = cache.try_prune() {
                    tracing::debug!(?report, "explicit prune");
                }
            }
        }));
    }

    std::thread::sleep(Duration::from_secs(args.time));
    stop.store(true, Ordering::Relaxed);
    handles.into_iter().try_for_each(|handle| handle.join()).map_err(|_| anyhow::anyhow!("bench thread panicked"))?;

    let metrics_dump_end = metrics.dump();
    let analysis = analyze(time.elapsed(), &metrics_dump_start, &metrics_dump_end, cache.statistics());
    println!("\nTotal:\n{}", analysis);

    let report = cache.prune();
    println!("\nFinal prune: {:?}\n{:?}", report, cache.statistics());

    handle_monitor
        .join()
        .map_err(|_| anyhow::anyhow!("monitor thread panicked"))?;
    Ok(())
}

fn write(id: u64, args: Args, cache: Cache<u64, Value>, metrics: Metrics, stop: Arc<AtomicBool>) {
    let mut rng = SmallRng::seed_from_u64(id);
    let interval = Duration::from_micros(args.write_interval);

    while !stop.load(Ordering::Relaxed) {
        let start = Instant::now();
        let mut ticket = match cache.begin_write_timeout(Duration::from_millis(100)) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::trace!("[writer {id}]: {e}");
                metrics.busy.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let generation = ticket.generation();
        for _ in 0..args.batch {
            let key = rng.random_range(0..args.keys);
            if rng.random_bool(args.remove_ratio) {
                ticket.remove(key);
            } else {
                ticket.set(
                    key,
                    Value {
                        generation,
                        payload: vec![generation as u8; args.entry_size],
                    },
                );
            }
        }
        let changes = ticket.len();
        if let Err(e) = ticket.commit() {
            tracing::error!("[writer {id}]: commit error: {e}");
            continue;
        }
        record(&metrics.commit_lats, start);
        metrics.commits.fetch_add(1, Ordering::Relaxed);
        metrics.changes.fetch_add(changes as _, Ordering::Relaxed);

        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

fn read(id: u64, args: Args, cache: Cache<u64, Value>, metrics: Metrics, stop: Arc<AtomicBool>) {
    let mut rng = SmallRng::seed_from_u64(u64::MAX - id);
    let hold = Duration::from_micros(args.hold);

    while !stop.load(Ordering::Relaxed) {
        let start = Instant::now();
        let snapshot = cache.open_snapshot();
        record(&metrics.open_lats, start);
        metrics.snapshots.fetch_add(1, Ordering::Relaxed);

        let keys = (0..args.reads).map(|_| rng.random_range(0..args.keys)).collect_vec();
        let mut hits = 0;
        for key in keys.iter() {
            let start = Instant::now();
            let entry = snapshot.get(key);
            record(&metrics.get_lats, start);

            if let Some(entry) = entry {
                assert!(entry.generation() <= snapshot.generation());
                assert_eq!(entry.value().generation, entry.generation());
                assert_eq!(entry.value().payload.len(), args.entry_size);
                hits += 1;
            }
        }
        metrics.gets.fetch_add(keys.len() as _, Ordering::Relaxed);
        metrics.hits.fetch_add(hits, Ordering::Relaxed);

        // Reads are repeatable within a snapshot.
        if let Some(key) = keys.first() {
            let first = snapshot.get(key).map(|e| e.generation());
            assert_eq!(first, snapshot.get(key).map(|e| e.generation()));
        }

        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
    }
}
