//! Cardinality control for the reserved, automatically added metric labels.

use std::collections::HashSet;

use tracing::debug;

use crate::metrics::labels::KNOWN_METRIC_LABEL_FILTERS;

/// The set of reserved labels that should be kept on granular metrics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelFilterConfig {
    enabled: HashSet<String>,
}

impl LabelFilterConfig {
    pub fn new<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
        }
    }

    /// Keep every reserved label.
    pub fn all() -> Self {
        Self::new(KNOWN_METRIC_LABEL_FILTERS)
    }

    /// Drop every reserved label.
    pub fn none() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn is_enabled(&self, label: &str) -> bool {
        self.enabled.contains(label)
    }

    /// Configured names that are not reserved labels and therefore have no effect.
    pub fn unknown_labels(&self) -> Vec<&str> {
        let mut unknown: Vec<&str> = self
            .enabled
            .iter()
            .map(String::as_str)
            .filter(|label| !KNOWN_METRIC_LABEL_FILTERS.contains(label))
            .collect();
        unknown.sort_unstable();
        unknown
    }
}

impl Default for LabelFilterConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// Drops the reserved labels that are disabled in `config`.
///
/// The last `KNOWN_METRIC_LABEL_FILTERS.len()` entries of `labels` must be the
/// reserved labels in the exact order of [`KNOWN_METRIC_LABEL_FILTERS`]; they
/// are matched by position, not by name. A shorter input is returned unchanged.
pub fn filter_metric_labels<S: AsRef<str>>(labels: &[S], config: &LabelFilterConfig) -> Vec<String> {
    let Some(offset) = labels.len().checked_sub(KNOWN_METRIC_LABEL_FILTERS.len()) else {
        let labels: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        debug!(
            event.name = "metrics.filter.not_enough_labels",
            labels = ?labels,
            expected_at_least = KNOWN_METRIC_LABEL_FILTERS.len(),
            "not enough labels provided to the metric label filter"
        );
        return labels.into_iter().map(str::to_owned).collect();
    };

    let mut filtered: Vec<String> = labels[..offset]
        .iter()
        .map(|label| label.as_ref().to_owned())
        .collect();
    for (i, reserved) in KNOWN_METRIC_LABEL_FILTERS.iter().enumerate() {
        if config.is_enabled(reserved) {
            filtered.push(labels[offset + i].as_ref().to_owned());
        }
    }
    filtered
}
