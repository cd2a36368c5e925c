//! Pod-lifecycle-aware Prometheus metrics.
//!
//! Metric vectors that carry `pod` and `namespace` labels are tracked by a
//! [`metrics::MetricsContext`]. When a pod is deleted, its series are evicted
//! from every tracked vector after a grace delay so that exporters do not keep
//! serving stale series forever.

pub mod k8s;
pub mod metrics;
pub mod runtime;
