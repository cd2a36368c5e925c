use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::{
    k8s::opts::K8sOptions,
    metrics::opts::MetricsOptions,
    runtime::{cli::Cli, conf::conf_serde::level},
};

/// Application configuration.
///
/// Layered as defaults < configuration file < CLI arguments and their
/// environment variables.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Path of the file this configuration was loaded from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(with = "level")]
    pub log_level: Level,

    /// Metric cleanup and the Prometheus endpoint.
    #[serde(default)]
    pub metrics: MetricsOptions,

    /// The pod delete watch.
    #[serde(default)]
    pub k8s: K8sOptions,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: Level::INFO,
            metrics: MetricsOptions::default(),
            k8s: K8sOptions::default(),
        }
    }
}

impl Conf {
    /// Builds the configuration from `cli`, merging the configuration file it
    /// names (if any) over the defaults and the CLI arguments over both.
    ///
    /// # Errors
    ///
    /// * `ConfigError::NoConfigFile` - the configuration file does not exist.
    /// * `ConfigError::InvalidConfigPath` - the path is not a regular file.
    /// * `ConfigError::InvalidExtension` - the file is not `yaml` or `yml`.
    /// * `ConfigError::Extraction` - the merged configuration is invalid.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment.merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;
        if let Some(node_name) = &cli.node_name {
            conf.k8s.node_name = Some(node_name.clone());
        }

        conf.config_path = config_path_to_store;
        Ok((conf, cli))
    }
}

fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfigError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        }
        return Err(ConfigError::NoConfigFile);
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfigError::InvalidExtension(ext.to_string())),
        None => Err(ConfigError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("no config file provided")]
    NoConfigFile,
    /// The path exists but is not a file.
    #[error("path '{0}' is not a valid file")]
    InvalidConfigPath(String),
    #[error("invalid file extension '.{0}', expected 'yaml' or 'yml'")]
    InvalidExtension(String),
    #[error("configuration error: {0}")]
    Extraction(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Extraction(Box::new(e))
    }
}

pub mod conf_serde {
    pub mod level {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use tracing::Level;

        pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(level.as_str())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse::<Level>().map_err(serde::de::Error::custom)
        }

        pub mod option {
            use super::*;

            pub fn serialize<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                match level {
                    Some(l) => serializer.serialize_str(l.as_str()),
                    None => serializer.serialize_none(),
                }
            }

            pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
            where
                D: Deserializer<'de>,
            {
                Option::<String>::deserialize(deserializer)?
                    .map(|s| s.parse::<Level>().map_err(serde::de::Error::custom))
                    .transpose()
            }
        }
    }

    /// Human readable durations such as `90s` or `1m`.
    pub mod duration {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            humantime::parse_duration(&s).map_err(serde::de::Error::custom)
        }
    }
}
