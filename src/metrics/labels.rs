//! Constants for metric labels.

// Pod identity
pub const POD: &str = "pod";
pub const NAMESPACE: &str = "namespace";

// Filterable labels
pub const WORKLOAD: &str = "workload";
pub const BINARY: &str = "binary";

/// Labels added automatically to granular metrics, in canonical order.
///
/// Callers may not declare these themselves. Whether each one ends up on a
/// metric is decided by the configured label filter.
pub const KNOWN_METRIC_LABEL_FILTERS: [&str; 4] = [NAMESPACE, WORKLOAD, POD, BINARY];

/// Returns true if `label` is one of [`KNOWN_METRIC_LABEL_FILTERS`].
pub fn is_reserved(label: &str) -> bool {
    KNOWN_METRIC_LABEL_FILTERS.contains(&label)
}
