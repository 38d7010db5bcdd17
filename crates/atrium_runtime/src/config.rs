//! Kernel configuration.

use atrium_graph::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with managed objects still loaded when the office closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakDetection {
    /// Do not check
    Off,
    /// Log every leaked object
    #[default]
    Warn,
}

/// Settings applied when an office is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// How often the monitor checks asynchronous timeouts, in milliseconds
    pub monitor_interval_ms: u64,
    /// Upper bound on threads of any one worker pool
    pub max_worker_threads: usize,
    /// Prefix of worker thread names
    pub thread_name_prefix: String,
    /// Leak detection on close
    pub leak_detection: LeakDetection,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 100,
            max_worker_threads: 64,
            thread_name_prefix: "atrium".to_string(),
            leak_detection: LeakDetection::Warn,
        }
    }
}

impl KernelConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file can not be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    /// Set the monitor interval
    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker pool bound
    #[must_use]
    pub fn with_max_worker_threads(mut self, threads: usize) -> Self {
        self.max_worker_threads = threads;
        self
    }

    /// Set the worker thread name prefix
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set leak detection
    #[must_use]
    pub fn with_leak_detection(mut self, leak_detection: LeakDetection) -> Self {
        self.leak_detection = leak_detection;
        self
    }

    /// Monitor interval, never zero
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    /// Threads to start for a pool that asked for `requested`
    #[must_use]
    pub fn worker_threads(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_worker_threads.max(1))
    }
}
