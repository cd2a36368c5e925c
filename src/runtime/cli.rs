use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "podmetrics.yaml").
    #[arg(short, long, value_name = "FILE", env = "PODMETRICS_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn"). Overrides the
    /// configuration file.
    #[arg(short, long, value_name = "LEVEL", env = "PODMETRICS_LOG_LEVEL")]
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "level::option"
    )]
    pub log_level: Option<Level>,

    /// Only watch pods scheduled on this node.
    #[arg(long, value_name = "NODE", env = "PODMETRICS_NODE_NAME")]
    #[serde(skip)]
    pub node_name: Option<String>,
}
