//! Counters whose reserved labels are subject to the configured label filter.

use std::sync::{Arc, Mutex, PoisonError};

use prometheus::{IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::metrics::{
    context::MetricsContext,
    error::MetricsError,
    filter::{LabelFilterConfig, filter_metric_labels},
    labels::{KNOWN_METRIC_LABEL_FILTERS, is_reserved},
    tracked::TrackedMetricRegistry,
};

/// A pod-tracked counter vector that is built lazily, on first use.
///
/// The reserved labels of [`KNOWN_METRIC_LABEL_FILTERS`] are appended to the
/// caller's labels and then filtered once, when the vector is first requested.
/// Every later request returns the same vector.
pub struct GranularCounter {
    opts: Opts,
    labels: Vec<String>,
    filter: LabelFilterConfig,
    tracked: Arc<TrackedMetricRegistry>,
    registry: Registry,
    counter: Mutex<Option<IntCounterVec>>,
}

impl GranularCounter {
    /// Declares a counter with the given caller labels.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ReservedLabel`] if a caller label is one of the
    /// reserved filterable labels.
    pub fn new(ctx: &MetricsContext, opts: Opts, labels: &[&str]) -> Result<Self, MetricsError> {
        if let Some(label) = labels.iter().find(|label| is_reserved(label)) {
            return Err(MetricsError::reserved_label(*label));
        }

        let labels = labels
            .iter()
            .chain(KNOWN_METRIC_LABEL_FILTERS.iter())
            .map(|label| label.to_string())
            .collect();

        Ok(Self {
            opts,
            labels,
            filter: ctx.label_filter().clone(),
            tracked: Arc::clone(ctx.tracked()),
            registry: ctx.registry().clone(),
            counter: Mutex::new(None),
        })
    }

    /// Like [`GranularCounter::new`], for metric definitions where a reserved
    /// label is a programming error.
    ///
    /// # Panics
    ///
    /// Panics if a caller label is one of the reserved filterable labels.
    pub fn must_new(ctx: &MetricsContext, opts: Opts, labels: &[&str]) -> Self {
        match Self::new(ctx, opts, labels) {
            Ok(counter) => counter,
            Err(e) => panic!("{e}"),
        }
    }

    /// Returns the underlying vector, building and registering it on first call.
    ///
    /// A build that fails is not cached; the next call tries again.
    pub fn counter(&self) -> Result<IntCounterVec, MetricsError> {
        let mut cell = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = cell.as_ref() {
            return Ok(counter.clone());
        }

        let labels = filter_metric_labels(self.labels.as_slice(), &self.filter);
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let counter = IntCounterVec::new(self.opts.clone(), &label_refs)?;
        self.registry.register(Box::new(counter.clone()))?;
        self.tracked.track(&counter);

        debug!(
            event.name = "metrics.granular.built",
            metric.name = %self.opts.name,
            labels = ?labels,
            "built granular counter"
        );

        *cell = Some(counter.clone());
        Ok(counter)
    }
}
