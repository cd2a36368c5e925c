use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct K8sOptions {
    /// Watch pod deletions and evict their metrics. Without it, series of
    /// deleted pods are never removed.
    pub enabled: bool,
    /// Only watch pods scheduled on this node. Usually set from the downward
    /// API when running as a DaemonSet.
    pub node_name: Option<String>,
}

impl Default for K8sOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            node_name: None,
        }
    }
}
