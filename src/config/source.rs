use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

/// What a source points at. File sources carry a path (optionally a glob),
/// docker sources carry optional image and label filters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    File {
        path: String,
    },
    Docker {
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Pending,
    Success,
    Error(String),
}

/// Sink for the discovery state of a single source.
#[derive(Debug, Default)]
pub struct SourceStatus {
    state: Mutex<Status>,
    errors: AtomicU64,
}

impl SourceStatus {
    pub fn error(&self, err: impl fmt::Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.set(Status::Error(err.to_string()));
    }

    pub fn success(&self) {
        self.set(Status::Success);
    }

    pub fn get(&self) -> Status {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.get(), Status::Error(_))
    }

    pub fn last_error(&self) -> Option<String> {
        match self.get() {
            Status::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Number of errors recorded since the source was created.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn set(&self, status: Status) {
        match self.state.lock() {
            Ok(mut state) => *state = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }
}

/// A configured log source. Shared read-only between discovery components,
/// only the status is mutated.
#[derive(Debug)]
pub struct LogSource {
    name: String,
    config: SourceConfig,
    status: SourceStatus,
}

impl LogSource {
    pub fn new(name: impl Into<String>, config: SourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            status: SourceStatus::default(),
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, SourceConfig::File { path: path.into() })
    }

    pub fn docker(name: impl Into<String>, image: Option<&str>, label: Option<&str>) -> Self {
        Self::new(
            name,
            SourceConfig::Docker {
                image: image.map(str::to_owned),
                label: label.map(str::to_owned),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn status(&self) -> &SourceStatus {
        &self.status
    }

    pub fn is_docker(&self) -> bool {
        matches!(self.config, SourceConfig::Docker { .. })
    }
}
