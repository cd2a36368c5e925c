pub mod cleanup;
pub mod context;
pub mod error;
pub mod filter;
pub mod granular;
pub mod labels;
pub mod opts;
pub mod queue;
pub mod server;
pub mod tracked;

pub use cleanup::{PodCleanupWorker, PodIdentity};
pub use context::MetricsContext;
pub use error::MetricsError;
pub use granular::GranularCounter;
pub use tracked::{TrackedMetric, TrackedMetricRegistry};
