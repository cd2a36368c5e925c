use std::{net::Ipv4Addr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{metrics::labels::KNOWN_METRIC_LABEL_FILTERS, runtime::conf::conf_serde::duration};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsOptions {
    /// Enable the metrics server.
    pub enabled: bool,
    /// The network address the metrics server will listen on.
    pub listen_address: String,
    /// The port the metrics server will listen on.
    pub port: u16,
    /// Reserved labels to keep on granular metrics. Any of
    /// `namespace`, `workload`, `pod` and `binary`.
    pub label_filter: Vec<String>,
    /// How long a deleted pod's series stay exported before they are removed.
    #[serde(with = "duration")]
    pub pod_delete_delay: Duration,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 9090,
            label_filter: KNOWN_METRIC_LABEL_FILTERS.iter().map(|s| s.to_string()).collect(),
            pod_delete_delay: Duration::from_secs(60),
        }
    }
}
