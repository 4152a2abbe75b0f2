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
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use snapcache::{Cache, Statistics};

use crate::Value;

/// Latencies in microseconds, from 1us to 10s.
fn histogram() -> Arc<RwLock<Histogram<u64>>> {
    Arc::new(RwLock::new(Histogram::new_with_bounds(1, 10_000_000, 2).unwrap()))
}

#[derive(Debug, Clone)]
pub struct Metrics {
    pub commit_lats: Arc<RwLock<Histogram<u64>>>,
    pub open_lats: Arc<RwLock<Histogram<u64>>>,
    pub get_lats: Arc<RwLock<Histogram<u64>>>,

    pub commits: Arc<AtomicU64>,
    pub changes: Arc<AtomicU64>,
    pub busy: Arc<AtomicU64>,
    pub snapshots: Arc<AtomicU64>,
    pub gets: Arc<AtomicU64>,
    pub hits: Arc<AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            commit_lats: histogram(),
            open_lats: histogram(),
            get_lats: histogram(),
            commits: Arc::default(),
            changes: Arc::default(),
            busy: Arc::default(),
            snapshots: Arc::default(),
            gets: Arc::default(),
            hits: Arc::default(),
        }
    }
}

impl Metrics {
    pub fn dump(&self) -> MetricsDump {
        let percentiles = |histogram: &Arc<RwLock<Histogram<u64>>>| {
            let histogram = histogram.read();
            Percentiles {
                p50: histogram.value_at_quantile(0.5),
                p90: histogram.value_at_quantile(0.9),
                p99: histogram.value_at_quantile(0.99),
                p999: histogram.value_at_quantile(0.999),
                max: histogram.max(),
            }
        };

        MetricsDump {
            commits: self.commits.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            commit: percentiles(&self.commit_lats),
            open: percentiles(&self.open_lats),
            get: percentiles(&self.get_lats),
        }
    }
}

/// Record a latency, values out of range are logged and dropped.
pub fn record(histogram: &RwLock<Histogram<u64>>, start: Instant) {
    let lat = start.elapsed().as_micros() as u64;
    if let Err(e) = histogram.write().record(lat) {
        tracing::error!("metrics error: {:?}, value: {}", e, lat);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Percentiles {
    p50: u64,
    p90: u64,
    p99: u64,
    p999: u64,
    max: u64,
}

impl Display for Percentiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pp50: {}us, pp90: {}us, pp99: {}us, pp999: {}us, pmax: {}us",
            self.p50, self.p90, self.p99, self.p999, self.max
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsDump {
    commits: u64,
    changes: u64,
    busy: u64,
    snapshots: u64,
    gets: u64,
    hits: u64,
    commit: Percentiles,
    open: Percentiles,
    get: Percentiles,
}

#[derive(Debug)]
pub struct Analysis {
    commit_iops: f64,
    change_iops: f64,
    busy: u64,
    open_iops: f64,
    get_iops: f64,
    hit_ratio: f64,
    commit: Percentiles,
    open: Percentiles,
    get: Percentiles,
    statistics: Statistics,
}

pub fn analyze(duration: Duration, start: &MetricsDump, end: &MetricsDump, statistics: Statistics) -> Analysis {
    let secs = duration.as_secs_f64();
    let rate = |end: u64, start: u64| (end - start) as f64 / secs;

    let gets = end.gets - start.gets;
    let hit_ratio = if gets == 0 {
        0.0
    } else {
        (end.hits - start.hits) as f64 / gets as f64
    };

    Analysis {
        commit_iops: rate(end.commits, start.commits),
        change_iops: rate(end.changes, start.changes),
        busy: end.busy - start.busy,
        open_iops: rate(end.snapshots, start.snapshots),
        get_iops: rate(end.gets, start.gets),
        hit_ratio,
        commit: end.commit,
        open: end.open,
        get: end.get,
        statistics,
    }
}

impl Display for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "commit iops: {:.0}/s, change iops: {:.0}/s, writer busy: {}",
            self.commit_iops, self.change_iops, self.busy
        )?;
        writeln!(f, "commit lat - {}", self.commit)?;
        writeln!(f, "open iops: {:.0}/s", self.open_iops)?;
        writeln!(f, "open lat - {}", self.open)?;
        writeln!(f, "get iops: {:.0}/s, hit ratio: {:.2}%", self.get_iops, self.hit_ratio * 100.0)?;
        writeln!(f, "get lat - {}", self.get)?;
        write!(
            f,
            "generation: {}, floor: {}, lag: {}, generations: {}, snapshots: {}, keys: {}, versions: {}",
            self.statistics.generation,
            self.statistics.floor,
            self.statistics.generation - self.statistics.floor,
            self.statistics.generations,
            self.statistics.snapshots,
            self.statistics.keys,
            self.statistics.versions,
        )
    }
}

pub fn monitor(cache: Cache<u64, Value>, interval: Duration, metrics: Metrics, stop: Arc<AtomicBool>) {
    let mut start = Instant::now();
    let mut dump = metrics.dump();
    loop {
        std::thread::sleep(interval);
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        let new = metrics.dump();
        let analysis = analyze(now.duration_since(start), &dump, &new, cache.statistics());
        println!("{analysis}\n");
        start = now;
        dump = new;
    }
}
