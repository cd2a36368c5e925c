//! The metrics context shared by metric definitions, the pod delete bridge and
//! the cleanup worker.
//!
//! Components receive the context explicitly. For call sites that cannot, a
//! process-wide context is available through [`init_global`] and [`global`].

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    core::Collector,
};
use tracing::warn;

use crate::{
    k8s::bridge::PodDeleteBridge,
    metrics::{
        cleanup::{CleanupMetrics, PodCleanupWorker, PodIdentity},
        error::MetricsError,
        filter::LabelFilterConfig,
        granular::GranularCounter,
        opts::MetricsOptions,
        queue::DelayedEvictionQueue,
        tracked::{TrackedMetric, TrackedMetricRegistry},
    },
};

static GLOBAL: OnceLock<MetricsContext> = OnceLock::new();

pub struct MetricsContext {
    registry: Registry,
    tracked: Arc<TrackedMetricRegistry>,
    queue: Arc<DelayedEvictionQueue<PodIdentity>>,
    label_filter: LabelFilterConfig,
    pod_delete_delay: Duration,
    cleanup_metrics: CleanupMetrics,
}

impl MetricsContext {
    /// Creates a context with its own Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::PrometheusError`] if the cleanup metrics cannot
    /// be created or registered.
    pub fn new(options: &MetricsOptions) -> Result<Self, MetricsError> {
        let label_filter = LabelFilterConfig::new(options.label_filter.iter().cloned());
        let unknown = label_filter.unknown_labels();
        if !unknown.is_empty() {
            warn!(
                event.name = "metrics.filter.unknown_labels",
                labels = ?unknown,
                "label filter contains labels that are not filterable, they will be ignored"
            );
        }

        let registry = Registry::new();
        let cleanup_metrics = CleanupMetrics::new()?;
        cleanup_metrics.register(&registry)?;

        Ok(Self {
            registry,
            tracked: Arc::new(TrackedMetricRegistry::new()),
            queue: Arc::new(DelayedEvictionQueue::new()),
            label_filter,
            pod_delete_delay: options.pod_delete_delay,
            cleanup_metrics,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracked(&self) -> &Arc<TrackedMetricRegistry> {
        &self.tracked
    }

    pub fn queue(&self) -> &Arc<DelayedEvictionQueue<PodIdentity>> {
        &self.queue
    }

    pub fn label_filter(&self) -> &LabelFilterConfig {
        &self.label_filter
    }

    pub fn pod_delete_delay(&self) -> Duration {
        self.pod_delete_delay
    }

    /// Declares a [`GranularCounter`]. See [`GranularCounter::new`].
    pub fn granular_counter(&self, opts: Opts, labels: &[&str]) -> Result<GranularCounter, MetricsError> {
        GranularCounter::new(self, opts, labels)
    }

    /// Creates an integer counter vector that is cleaned up when a pod is deleted.
    ///
    /// Should only be used for metrics with `pod` and `namespace` labels.
    pub fn new_int_counter_vec_with_pod(
        &self,
        opts: Opts,
        labels: &[&str],
    ) -> Result<IntCounterVec, MetricsError> {
        self.register_with_pod(IntCounterVec::new(opts, labels)?)
    }

    /// Creates a counter vector that is cleaned up when a pod is deleted.
    ///
    /// Should only be used for metrics with `pod` and `namespace` labels.
    pub fn new_counter_vec_with_pod(&self, opts: Opts, labels: &[&str]) -> Result<CounterVec, MetricsError> {
        self.register_with_pod(CounterVec::new(opts, labels)?)
    }

    /// Creates a gauge vector that is cleaned up when a pod is deleted.
    ///
    /// Should only be used for metrics with `pod` and `namespace` labels.
    pub fn new_gauge_vec_with_pod(&self, opts: Opts, labels: &[&str]) -> Result<GaugeVec, MetricsError> {
        self.register_with_pod(GaugeVec::new(opts, labels)?)
    }

    /// Creates an integer gauge vector that is cleaned up when a pod is deleted.
    ///
    /// Should only be used for metrics with `pod` and `namespace` labels.
    pub fn new_int_gauge_vec_with_pod(
        &self,
        opts: Opts,
        labels: &[&str],
    ) -> Result<IntGaugeVec, MetricsError> {
        self.register_with_pod(IntGaugeVec::new(opts, labels)?)
    }

    /// Creates a histogram vector that is cleaned up when a pod is deleted.
    ///
    /// Should only be used for metrics with `pod` and `namespace` labels.
    pub fn new_histogram_vec_with_pod(
        &self,
        opts: HistogramOpts,
        labels: &[&str],
    ) -> Result<HistogramVec, MetricsError> {
        self.register_with_pod(HistogramVec::new(opts, labels)?)
    }

    fn register_with_pod<M>(&self, metric: M) -> Result<M, MetricsError>
    where
        M: TrackedMetric + Collector + Clone + 'static,
    {
        self.registry.register(Box::new(metric.clone()))?;
        self.tracked.track(&metric);
        Ok(metric)
    }

    /// The worker that drains this context's eviction queue.
    pub fn cleanup_worker(&self) -> PodCleanupWorker {
        PodCleanupWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.tracked),
            self.cleanup_metrics.clone(),
        )
    }

    /// A bridge that schedules this context's evictions after the pod delete delay.
    pub fn pod_delete_bridge(&self) -> PodDeleteBridge {
        PodDeleteBridge::new(Arc::clone(&self.queue), self.pod_delete_delay)
            .with_pending_gauge(self.cleanup_metrics.queue_pending_gauge())
    }

    /// Stops the eviction queue, which in turn stops the cleanup worker.
    ///
    /// Evictions still waiting for their delay are dropped.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

/// Initializes the process-wide context.
///
/// # Errors
///
/// Returns [`MetricsError::AlreadyInitialized`] if a context was already
/// installed, either by an earlier call or by [`global`].
pub fn init_global(options: &MetricsOptions) -> Result<&'static MetricsContext, MetricsError> {
    if GLOBAL.get().is_some() {
        return Err(MetricsError::AlreadyInitialized);
    }

    let candidate = MetricsContext::new(options)?;
    let mut installed = false;
    let global = GLOBAL.get_or_init(|| {
        installed = true;
        candidate
    });

    if installed {
        Ok(global)
    } else {
        Err(MetricsError::AlreadyInitialized)
    }
}

/// The process-wide context, initialized with default options on first use if
/// [`init_global`] was never called.
///
/// # Panics
///
/// Panics if the default context cannot register its cleanup metrics.
pub fn global() -> &'static MetricsContext {
    GLOBAL.get_or_init(|| {
        MetricsContext::new(&MetricsOptions::default())
            .expect("failed to create default metrics context")
    })
}

#[cfg(test)]
mod tests {
    use prometheus::Encoder;

    use super::*;
    use crate::{
        k8s::bridge::{DeleteNotification, DeletedObject},
        metrics::cleanup::delete_metrics_for_pod,
    };

    #[test]
    fn vectors_with_pod_are_tracked_and_registered() {
        let ctx = MetricsContext::new(&MetricsOptions::default()).unwrap();

        let counter = ctx
            .new_int_counter_vec_with_pod(Opts::new("execs_total", "test"), &["pod", "namespace", "binary"])
            .unwrap();
        let gauge = ctx
            .new_gauge_vec_with_pod(Opts::new("open_files", "test"), &["pod", "namespace"])
            .unwrap();
        let histogram = ctx
            .new_histogram_vec_with_pod(HistogramOpts::new("latency_seconds", "test"), &["pod", "namespace"])
            .unwrap();
        ctx.new_counter_vec_with_pod(Opts::new("bytes_total", "test"), &["pod", "namespace"])
            .unwrap();
        ctx.new_int_gauge_vec_with_pod(Opts::new("threads", "test"), &["pod", "namespace"])
            .unwrap();

        assert_eq!(ctx.tracked().len(), 5);

        counter.with_label_values(&["x", "y", "/bin/sh"]).inc();
        gauge.with_label_values(&["x", "y"]).set(4.0);
        histogram.with_label_values(&["x", "y"]).observe(0.1);
        let names: Vec<String> = ctx
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"execs_total".to_string()));
        assert!(names.contains(&"open_files".to_string()));

        assert_eq!(delete_metrics_for_pod(ctx.tracked(), &PodIdentity::new("y", "x")), 3);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let ctx = MetricsContext::new(&MetricsOptions::default()).unwrap();
        ctx.new_int_counter_vec_with_pod(Opts::new("dup_total", "test"), &["pod", "namespace"])
            .unwrap();

        let err = ctx
            .new_int_counter_vec_with_pod(Opts::new("dup_total", "test"), &["pod", "namespace"])
            .unwrap_err();

        assert!(matches!(err, MetricsError::PrometheusError(_)));
        assert_eq!(ctx.tracked().len(), 1);
    }

    #[test]
    fn cleanup_metrics_are_exported() {
        let ctx = MetricsContext::new(&MetricsOptions::default()).unwrap();
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&ctx.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("podmetrics_cleanup_evictions_total"));
        assert!(text.contains("podmetrics_cleanup_series_deleted_total"));
        assert!(text.contains("podmetrics_cleanup_queue_pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_schedules_on_context_queue_after_configured_delay() {
        let ctx = MetricsContext::new(&MetricsOptions {
            pod_delete_delay: Duration::from_secs(15),
            ..MetricsOptions::default()
        })
        .unwrap();
        assert_eq!(ctx.pod_delete_delay(), Duration::from_secs(15));

        let pod = k8s_openapi::api::core::v1::Pod {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let start = tokio::time::Instant::now();
        assert!(ctx.pod_delete_bridge().handle(DeleteNotification::Deleted(DeletedObject::Pod(Box::new(pod)))));
        assert_eq!(ctx.queue().len(), 1);

        assert_eq!(ctx.queue().get().await, Some(PodIdentity::new("default", "web-0")));
        assert!(start.elapsed() >= ctx.pod_delete_delay());
    }

    #[test]
    fn global_context_is_initialized_once() {
        match init_global(&MetricsOptions::default()) {
            Ok(first) => assert!(std::ptr::eq(first, global())),
            Err(e) => assert!(matches!(e, MetricsError::AlreadyInitialized)),
        }
        assert!(matches!(
            init_global(&MetricsOptions::default()),
            Err(MetricsError::AlreadyInitialized)
        ));
    }
}
