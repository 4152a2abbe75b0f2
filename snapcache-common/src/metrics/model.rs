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


use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, BoxedHistogram, RegistryOps};

/// Metrics of a snapshot cache instance.
///
/// Counters are labeled with `{name, op}`, gauges with `{name, type}`, histograms with `{name, op}`.
#[derive(Debug)]
pub struct Metrics {
    /* write scope */
    /// Committed write scopes.
    pub commit: BoxedCounter,
    /// Aborted write scopes, including dropped and poisoned ones.
    pub abort: BoxedCounter,
    /// Rejected `begin_write` calls.
    pub writer_busy: BoxedCounter,

    /* snapshot */
    /// Opened snapshots.
    pub snapshot_open: BoxedCounter,
    /// Released snapshots.
    pub snapshot_release: BoxedCounter,
    /// Reads that found a live value.
    pub hit: BoxedCounter,
    /// Reads that found nothing or a tombstone.
    pub miss: BoxedCounter,

    /* pruner */
    /// Prune runs.
    pub prune: BoxedCounter,
    /// Versions unlinked by the pruner.
    pub reclaim: BoxedCounter,
    /// Keys dropped from the key table.
    pub key_remove: BoxedCounter,

    /// Versions retained across all chains.
    pub versions: BoxedGauge,
    /// Keys in the key table.
    pub keys: BoxedGauge,
    /// Live snapshots.
    pub snapshots: BoxedGauge,
    /// Tracked generations.
    pub generations: BoxedGauge,
    /// Distance between the current generation and the prune floor.
    pub lag: BoxedGauge,

    /// Commit durations in seconds.
    pub commit_duration: BoxedHistogram,
    /// Prune durations in seconds.
    pub prune_duration: BoxedHistogram,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &dyn RegistryOps) -> Self {
        let name: Cow<'static, str> = name.into();

        let snapcache_op_total =
            registry.register_counter_vec("snapcache_op_total".into(), "snapcache operations".into(), &["name", "op"]);
        let snapcache_usage =
            registry.register_gauge_vec("snapcache_usage".into(), "snapcache resource usage".into(), &["name", "type"]);
        let snapcache_op_duration = registry.register_histogram_vec(
            "snapcache_op_duration".into(),
            "snapcache operation durations".into(),
            &["name", "op"],
        );

        let counter = |op: &'static str| snapcache_op_total.counter(&[name.clone(), op.into()]);
        let gauge = |ty: &'static str| snapcache_usage.gauge(&[name.clone(), ty.into()]);
        let histogram = |op: &'static str| snapcache_op_duration.histogram(&[name.clone(), op.into()]);

        Self {
            commit: counter("commit"),
            abort: counter("abort"),
            writer_busy: counter("writer_busy"),
            snapshot_open: counter("snapshot_open"),
            snapshot_release: counter("snapshot_release"),
            hit: counter("hit"),
            miss: counter("miss"),
            prune: counter("prune"),
            reclaim: counter("reclaim"),
            key_remove: counter("key_remove"),

            versions: gauge("versions"),
            keys: gauge("keys"),
            snapshots: gauge("snapshots"),
            generations: gauge("generations"),
            lag: gauge("lag"),

            commit_duration: histogram("commit"),
            prune_duration: histogram("prune"),
        }
    }

    /// Build noop metrics.
    ///
    /// Note: `noop` is only supposed to be called by other snapcache components.
    #[doc(hidden)]
    pub fn noop() -> Self {
        use super::registry::noop::NoopMetricsRegistry;

        Self::new("test", &NoopMetricsRegistry)
    }
}
