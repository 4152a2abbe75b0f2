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
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::{Arc, LazyLock},
};

use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{
    core::Collector, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};

use crate::{
    metrics::{
        BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, BoxedHistogram, BoxedHistogramVec, Boxer, CounterOps,
        CounterVecOps, GaugeOps, GaugeVecOps, HistogramOps, HistogramVecOps, RegistryOps,
    },
    scope::Scope,
};

/// Registered metric vectors of every [`PrometheusMetricsRegistry`], keyed by the wrapped registry.
static METRICS: LazyLock<Mutex<HashMap<PrometheusMetricsRegistry, HashMap<Metadata, MetricVec>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
    Histogram(HistogramVec),
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Metadata {
    kind: MetricKind,
    name: Cow<'static, str>,
    desc: Cow<'static, str>,
    label_names: &'static [&'static str],
}

impl Metadata {
    fn build(&self) -> prometheus::Result<MetricVec> {
        let vec = match self.kind {
            MetricKind::Counter => {
                IntCounterVec::new(Opts::new(self.name.as_ref(), self.desc.as_ref()), self.label_names)
                    .map(MetricVec::Counter)?
            }
            MetricKind::Gauge => IntGaugeVec::new(Opts::new(self.name.as_ref(), self.desc.as_ref()), self.label_names)
                .map(MetricVec::Gauge)?,
            MetricKind::Histogram => HistogramVec::new(
                HistogramOpts::new(self.name.as_ref(), self.desc.as_ref()),
                self.label_names,
            )
            .map(MetricVec::Histogram)?,
        };
        Ok(vec)
    }
}

impl MetricVec {
    fn collector(&self) -> Box<dyn Collector> {
        match self {
            MetricVec::Counter(v) => Box::new(v.clone()) as Box<dyn Collector>,
            MetricVec::Gauge(v) => Box::new(v.clone()),
            MetricVec::Histogram(v) => Box::new(v.clone()),
        }
    }
}

fn get_or_register(registry: &PrometheusMetricsRegistry, metadata: Metadata) -> MetricVec {
    METRICS.lock().with(|mut metrics| {
        let vecs = metrics.entry(registry.clone()).or_default();
        if let Some(vec) = vecs.get(&metadata) {
            return vec.clone();
        }
        let vec = metadata
            .build()
            .and_then(|vec| registry.registry.register(vec.collector()).map(|_| vec))
            .unwrap_or_else(|e| panic!("failed to register metric {}: {e}", metadata.name));
        vecs.insert(metadata, vec.clone());
        vec
    })
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl HistogramOps for Histogram {
    fn record(&self, val: f64) {
        self.observe(val);
    }
}

impl HistogramVecOps for HistogramVec {
    fn histogram(&self, labels: &[Cow<'static, str>]) -> BoxedHistogram {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

/// Prometheus metric registry with lib `prometheus`.
///
/// The [`PrometheusMetricsRegistry`] can be cloned and used by multiple caches, without worrying about
/// duplicately registering.
///
/// Wrapping the same [`Registry`] twice with [`PrometheusMetricsRegistry::new`] registers the metrics twice and
/// panics.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Arc<Registry>,
}

impl PartialEq for PrometheusMetricsRegistry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for PrometheusMetricsRegistry {}

impl Hash for PrometheusMetricsRegistry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.registry).hash(state);
    }
}

impl PrometheusMetricsRegistry {
    /// Create an Prometheus metrics registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// The wrapped prometheus registry, for gathering.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        let metadata = Metadata {
            kind: MetricKind::Counter,
            name,
            desc,
            label_names,
        };
        match get_or_register(self, metadata) {
            MetricVec::Counter(v) => v.boxed(),
            _ => unreachable!(),
        }
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        let metadata = Metadata {
            kind: MetricKind::Gauge,
            name,
            desc,
            label_names,
        };
        match get_or_register(self, metadata) {
            MetricVec::Gauge(v) => v.boxed(),
            _ => unreachable!(),
        }
    }

    fn register_histogram_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedHistogramVec {
        let metadata = Metadata {
            kind: MetricKind::Histogram,
            name,
            desc,
            label_names,
        };
        match get_or_register(self, metadata) {
            MetricVec::Histogram(v) => v.boxed(),
            _ => unreachable!(),
        }
    }
}
