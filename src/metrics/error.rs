//! Error types for the metrics module.

use std::io;

use thiserror::Error;

use crate::metrics::labels::KNOWN_METRIC_LABEL_FILTERS;

/// Errors that can occur in the metrics system.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A caller declared a label that is reserved for automatic cardinality control.
    #[error(
        "label '{label}' is reserved: granular metrics can't declare any of {:?}, these labels are added automatically",
        KNOWN_METRIC_LABEL_FILTERS
    )]
    ReservedLabel {
        /// The offending label.
        label: String,
    },

    /// The process-wide metrics context was already initialized.
    #[error("metrics context is already initialized")]
    AlreadyInitialized,

    /// Failed to bind to the configured address and port.
    #[error("failed to bind metrics server to {address}: {source}")]
    BindAddress {
        /// The address that failed to bind.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to serve HTTP requests.
    #[error("metrics server error: {0}")]
    ServeError(#[from] io::Error),

    /// Prometheus registry error.
    #[error("prometheus registry error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

impl MetricsError {
    /// Create a reserved label error.
    pub fn reserved_label(label: impl Into<String>) -> Self {
        Self::ReservedLabel {
            label: label.into(),
        }
    }

    /// Create a bind address error.
    pub fn bind_address(address: impl Into<String>, source: io::Error) -> Self {
        Self::BindAddress {
            address: address.into(),
            source,
        }
    }
}
