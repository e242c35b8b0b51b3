//! Agent configuration.
//!
//! The configuration is a JSON document read from the file named by
//! `CREO_LOGS_CONFIG` (default [`DEFAULT_CONFIG_PATH`]). Everything except the
//! source list has a default.
mod error;
mod source;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

pub use error::{Error, Result};
pub use source::{LogSource, SourceConfig, SourceStatus, Status};

use crate::fanout;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/creo-logs/config.json";
pub const CONFIG_PATH_ENV: &str = "CREO_LOGS_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,
    #[serde(default = "default_open_files_limit")]
    pub open_files_limit: usize,
    #[serde(default = "default_pipelines")]
    pub pipelines: usize,
    #[serde(default = "default_pipeline_buffer_size")]
    pub pipeline_buffer_size: usize,
    #[serde(default = "default_scan_period_secs")]
    pub scan_period_secs: u64,
    #[serde(default)]
    pub event_fanout: FanoutSettings,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanoutSettings {
    #[serde(default = "default_fanout_name")]
    pub name: String,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_output_buffer_size")]
    pub output_buffer_size: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            name: default_fanout_name(),
            write_timeout_ms: default_write_timeout_ms(),
            output_buffer_size: default_output_buffer_size(),
        }
    }
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_open_files_limit() -> usize {
    100
}

fn default_pipelines() -> usize {
    4
}

fn default_pipeline_buffer_size() -> usize {
    100
}

fn default_scan_period_secs() -> u64 {
    10
}

fn default_fanout_name() -> String {
    "container-events".to_owned()
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_output_buffer_size() -> usize {
    100
}

impl Config {
    /// Reads the configuration from the path in `CREO_LOGS_CONFIG`, falling back
    /// to [`DEFAULT_CONFIG_PATH`].
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::from_path(path)
    }

    /// Reads and validates the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::Read`] if the file cannot be read.
    /// - [`Error::Parse`] if the content is not a valid configuration document.
    /// - [`Error::Invalid`] if a value is out of range.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::debug!(
            "Loaded configuration from `{}` with {} sources",
            path.display(),
            config.sources.len()
        );

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pipelines == 0 {
            return Err(Error::Invalid("`pipelines` must be higher than 0".to_owned()));
        }
        if self.scan_period_secs == 0 {
            return Err(Error::Invalid(
                "`scan_period_secs` must be higher than 0".to_owned(),
            ));
        }
        if self.pipeline_buffer_size == 0 {
            return Err(Error::Invalid(
                "`pipeline_buffer_size` must be higher than 0".to_owned(),
            ));
        }
        for entry in &self.sources {
            if entry.name.is_empty() {
                return Err(Error::Invalid("source name can't be empty".to_owned()));
            }
            if let SourceConfig::File { path } = &entry.config {
                if path.is_empty() {
                    return Err(Error::Invalid(format!(
                        "file source `{}` has an empty path",
                        entry.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Builds the shared log sources, in configuration order.
    pub fn log_sources(&self) -> Vec<Arc<LogSource>> {
        self.sources
            .iter()
            .map(|entry| Arc::new(LogSource::new(entry.name.clone(), entry.config.clone())))
            .collect()
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }

    /// Fan-out configuration for container events. Validation happens in
    /// [`fanout::EventFanout::setup`].
    pub fn event_fanout(&self) -> fanout::Config {
        fanout::Config {
            name: self.event_fanout.name.clone(),
            write_timeout: Duration::from_millis(self.event_fanout.write_timeout_ms),
            output_buffer_size: self.event_fanout.output_buffer_size,
        }
    }
}
