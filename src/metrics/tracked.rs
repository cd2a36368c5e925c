//! Registry of metric vectors whose series are scoped to a pod.
//!
//! Every vector registered here is expected to declare `pod` and `namespace`
//! labels. When a pod goes away, the cleanup worker walks this registry and
//! drops the pod's series from each vector.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use prometheus::core::{Collector, MetricVec, MetricVecBuilder};

/// A multi-label metric vector whose series can be deleted by partial label match.
pub trait TrackedMetric: Send + Sync {
    /// Fully qualified metric name.
    fn name(&self) -> String;

    /// Deletes every series whose labels contain all of `labels`, ignoring the
    /// labels not mentioned. Returns the number of series removed.
    ///
    /// A label the vector does not declare matches nothing.
    fn delete_partial_match(&self, labels: &HashMap<&str, &str>) -> usize;
}

impl<T> TrackedMetric for MetricVec<T>
where
    T: MetricVecBuilder + 'static,
{
    fn name(&self) -> String {
        self.desc()
            .first()
            .map(|desc| desc.fq_name.clone())
            .unwrap_or_default()
    }

    fn delete_partial_match(&self, labels: &HashMap<&str, &str>) -> usize {
        let descs = self.desc();
        let Some(desc) = descs.first() else {
            return 0;
        };
        let variable_labels = &desc.variable_labels;
        if !labels
            .keys()
            .all(|name| variable_labels.iter().any(|label| label == name))
        {
            return 0;
        }

        let mut deleted = 0;
        for family in self.collect() {
            for metric in family.get_metric() {
                // Const labels show up in the collected pairs but are not part
                // of the vector's label values.
                let series: HashMap<&str, &str> = metric
                    .get_label()
                    .iter()
                    .filter(|pair| variable_labels.iter().any(|label| label == pair.get_name()))
                    .map(|pair| (pair.get_name(), pair.get_value()))
                    .collect();

                let matches = labels
                    .iter()
                    .all(|(name, value)| series.get(name) == Some(value));
                // A concurrent delete may have raced us to it; that is still a no-op.
                if matches && self.remove(&series).is_ok() {
                    deleted += 1;
                }
            }
        }
        deleted
    }
}

/// Append-only collection of [`TrackedMetric`] handles.
#[derive(Default)]
pub struct TrackedMetricRegistry {
    metrics: RwLock<Vec<Arc<dyn TrackedMetric>>>,
}

impl TrackedMetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metric: Arc<dyn TrackedMetric>) {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metric);
    }

    /// Registers a clone of `metric`. Prometheus vectors share their series
    /// between clones, so deletions through the registry are visible on the
    /// caller's handle.
    pub fn track<M>(&self, metric: &M)
    where
        M: TrackedMetric + Clone + 'static,
    {
        self.register(Arc::new(metric.clone()));
    }

    /// Snapshot of everything registered so far.
    pub fn list(&self) -> Vec<Arc<dyn TrackedMetric>> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
