//! Run configuration loading and validation.
//!
//! Grounded on `toka_orchestration::config::AgentConfigLoader`'s
//! `serde_yaml`-based loading and field-by-field validation pattern.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one [`crate::Orchestrator`] instance, covering the
/// transport, coordinator, and orchestrator layers in one file so a
/// deployment ships a single config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum messages held per agent queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds to wait for an acknowledgement before retrying.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Maximum retries before giving up on an `AtLeastOnce` message.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between reliability-checker sweeps.
    #[serde(default = "default_reliability_sweep_secs")]
    pub reliability_sweep_secs: u64,
    /// Capacity of the transport's event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Seconds between expected agent heartbeats; an instance is flagged
    /// errored after twice this interval of silence.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Maximum agent invocations the strategy engine runs concurrently.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Minimum quality score for a run to be considered fully successful.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_ack_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_reliability_sweep_secs() -> u64 {
    1
}
fn default_event_buffer() -> usize {
    1024
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_max_concurrent_tasks() -> usize {
    8
}
fn default_quality_threshold() -> f64 {
    0.8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ack_timeout_secs: default_ack_timeout_secs(),
            max_retries: default_max_retries(),
            reliability_sweep_secs: default_reliability_sweep_secs(),
            event_buffer: default_event_buffer(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            quality_threshold: default_quality_threshold(),
        }
    }
}

/// Error produced while loading or validating a [`RuntimeConfig`]. Exit
/// code 2 at the CLI boundary.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {detail}")]
    Read { path: String, detail: String },
    /// The file's contents were not valid YAML for this shape.
    #[error("failed to parse config: {detail}")]
    Parse { detail: String },
    /// The config parsed but failed a semantic check.
    #[error("invalid config: {detail}")]
    Invalid { detail: String },
}

impl RuntimeConfig {
    /// Parse and validate a config document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse { detail: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref).map_err(|e| ConfigError::Read {
            path: path_ref.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                detail: "queue_capacity must be > 0".into(),
            });
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid {
                detail: "max_concurrent_tasks must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid {
                detail: "quality_threshold must be within [0.0, 1.0]".into(),
            });
        }
        Ok(())
    }

    /// Project the transport-relevant fields into an
    /// `orch_transport::TransportConfig`.
    pub fn transport_config(&self) -> orch_transport::TransportConfig {
        orch_transport::TransportConfig {
            queue_capacity: self.queue_capacity,
            ack_timeout: Duration::from_secs(self.ack_timeout_secs),
            max_retries: self.max_retries,
            reliability_sweep_interval: Duration::from_secs(self.reliability_sweep_secs),
            event_buffer: self.event_buffer,
        }
    }

    /// The heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
