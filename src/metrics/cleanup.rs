//! Removal of metric series that belong to deleted pods.
//!
//! ## Problem
//!
//! Metrics labelled with `pod` and `namespace` grow a new series for every pod
//! that ever ran on the node. Prometheus vectors never forget a series on their
//! own, so a churning cluster slowly turns into unbounded exporter memory and
//! scrape size.
//!
//! ## Solution
//!
//! Pod deletions are scheduled on a [`DelayedEvictionQueue`] with a grace delay,
//! so that scrapes still in flight see the pod's final values. The
//! [`PodCleanupWorker`] consumes released pods and deletes their series from
//! every vector in the [`TrackedMetricRegistry`].

use std::{collections::HashMap, fmt, sync::Arc};

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use tracing::{debug, info, trace};

use crate::metrics::{
    labels::{NAMESPACE, POD},
    queue::DelayedEvictionQueue,
    tracked::TrackedMetricRegistry,
};

/// Identity of a pod whose metrics should be evicted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
}

impl PodIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Counters describing the cleanup worker itself.
#[derive(Clone)]
pub struct CleanupMetrics {
    evictions: IntCounter,
    series_deleted: IntCounter,
    queue_pending: IntGauge,
}

impl CleanupMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            evictions: IntCounter::with_opts(
                Opts::new("evictions_total", "Total number of pods whose metrics were evicted")
                    .namespace("podmetrics")
                    .subsystem("cleanup"),
            )?,
            series_deleted: IntCounter::with_opts(
                Opts::new(
                    "series_deleted_total",
                    "Total number of metric series deleted for evicted pods",
                )
                .namespace("podmetrics")
                .subsystem("cleanup"),
            )?,
            queue_pending: IntGauge::with_opts(
                Opts::new("queue_pending", "Number of deleted pods waiting for eviction")
                    .namespace("podmetrics")
                    .subsystem("cleanup"),
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.evictions.clone()))?;
        registry.register(Box::new(self.series_deleted.clone()))?;
        registry.register(Box::new(self.queue_pending.clone()))?;
        Ok(())
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.get()
    }

    pub fn series_deleted(&self) -> u64 {
        self.series_deleted.get()
    }

    pub fn queue_pending(&self) -> i64 {
        self.queue_pending.get()
    }

    /// Handle to the pending gauge, for producers that add to the queue.
    pub fn queue_pending_gauge(&self) -> IntGauge {
        self.queue_pending.clone()
    }
}

/// Deletes every series labelled with `pod` across all tracked vectors.
///
/// Returns the number of series removed. Vectors that hold nothing for the
/// pod are left as they are.
pub fn delete_metrics_for_pod(tracked: &TrackedMetricRegistry, pod: &PodIdentity) -> usize {
    let labels = HashMap::from([(POD, pod.name.as_str()), (NAMESPACE, pod.namespace.as_str())]);
    tracked
        .list()
        .iter()
        .map(|metric| {
            let deleted = metric.delete_partial_match(&labels);
            if deleted > 0 {
                trace!(
                    event.name = "metrics.cleanup.series_deleted",
                    metric.name = %metric.name(),
                    k8s.pod.name = %pod.name,
                    k8s.namespace.name = %pod.namespace,
                    deleted,
                    "deleted metric series for pod"
                );
            }
            deleted
        })
        .sum()
}

/// Single consumer of the eviction queue.
pub struct PodCleanupWorker {
    queue: Arc<DelayedEvictionQueue<PodIdentity>>,
    tracked: Arc<TrackedMetricRegistry>,
    metrics: CleanupMetrics,
}

impl PodCleanupWorker {
    pub fn new(
        queue: Arc<DelayedEvictionQueue<PodIdentity>>,
        tracked: Arc<TrackedMetricRegistry>,
        metrics: CleanupMetrics,
    ) -> Self {
        Self {
            queue,
            tracked,
            metrics,
        }
    }

    /// Runs until the queue is shut down.
    ///
    /// Should be spawned as a background task.
    pub async fn run(self) {
        info!(
            event.name = "metrics.cleanup.started",
            tracked_metrics = self.tracked.len(),
            "pod metric cleanup worker started"
        );

        while let Some(pod) = self.queue.get().await {
            let deleted = delete_metrics_for_pod(&self.tracked, &pod);
            self.metrics.evictions.inc();
            self.metrics.series_deleted.inc_by(deleted as u64);
            self.queue.done(&pod);
            self.metrics.queue_pending.set(self.queue.len() as i64);

            debug!(
                event.name = "metrics.cleanup.pod_evicted",
                k8s.pod.name = %pod.name,
                k8s.namespace.name = %pod.namespace,
                series_deleted = deleted,
                pending = self.queue.len(),
                "evicted metrics for deleted pod"
            );
        }

        // Keys still waiting for their delay were dropped by the shutdown.
        self.metrics.queue_pending.set(self.queue.len() as i64);

        debug!(
            event.name = "metrics.cleanup.shutdown",
            evictions = self.metrics.evictions(),
            "pod metric cleanup worker shutting down"
        );
    }
}
