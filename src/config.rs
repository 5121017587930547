use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 10;
const DEFAULT_GROW_DEBOUNCE_MS: u64 = 20;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 500;

/// Which worker pool backs a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// Exactly `workers` threads for the lifetime of the group.
    #[default]
    Fixed,
    /// Between one and `workers` threads, following the load.
    Adaptive,
}

/// What happens to jobs still sitting in the queue when the group stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Workers keep running queued jobs until the queue is empty.
    #[default]
    Drain,
    /// Queued jobs are dropped without running. Jobs a worker has
    /// already picked up still run to completion.
    Abandon,
}

/// Tuning knobs for the load-adaptive pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// How often the controller looks at the queue.
    pub sample_interval_ms: u64,
    /// How long the queue must stay non-empty with every worker busy
    /// before another worker is started.
    pub grow_debounce_ms: u64,
    /// How long a worker may find nothing to do before it retires.
    pub idle_timeout_ms: u64,
}

impl AdaptiveConfig {
    /// Controller sampling period.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Sustained-pressure window required before growing.
    pub fn grow_debounce(&self) -> Duration {
        Duration::from_millis(self.grow_debounce_ms)
    }

    /// Idle period after which a surplus worker exits.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            grow_debounce_ms: DEFAULT_GROW_DEBOUNCE_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

/// Configuration of a [`WorkerGroup`](crate::WorkerGroup).
///
/// For an adaptive group `workers` is the upper bound on the number of
/// threads; a fixed group always runs exactly that many.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Prefix for worker thread names and log messages.
    pub label: Option<String>,
    /// Fixed or load-adaptive.
    pub mode: PoolMode,
    /// Worker count (fixed) or maximum worker count (adaptive).
    pub workers: usize,
    /// Maximum number of pending jobs; `None` for unbounded.
    pub max_queue_len: Option<usize>,
    /// Fate of queued jobs on stop.
    pub shutdown: ShutdownPolicy,
    /// Only consulted in [`PoolMode::Adaptive`].
    pub adaptive: AdaptiveConfig,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            label: None,
            mode: PoolMode::Fixed,
            workers: num_cpus::get(),
            max_queue_len: None,
            shutdown: ShutdownPolicy::Drain,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl GroupConfig {
    /// A fixed pool of `workers` threads.
    pub fn fixed(workers: usize) -> Self {
        GroupConfig {
            workers,
            ..Default::default()
        }
    }

    /// A load-adaptive pool of at most `max_workers` threads.
    pub fn adaptive(max_workers: usize) -> Self {
        GroupConfig {
            mode: PoolMode::Adaptive,
            workers: max_workers,
            ..Default::default()
        }
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: GroupConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bounds the queue.
    pub fn with_max_queue_len(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = Some(max_queue_len);
        self
    }

    /// Sets the shutdown policy.
    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replaces the adaptive tuning.
    pub fn with_adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Label used for thread names, `worker` when none was given.
    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("worker")
    }

    /// Rejects configurations that are programming errors.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "worker count must be at least 1".to_owned(),
            ));
        }
        if self.max_queue_len == Some(0) {
            return Err(Error::InvalidConfig(
                "max_queue_len must be at least 1".to_owned(),
            ));
        }
        if let Some(label) = &self.label {
            if label.contains('\0') {
                return Err(Error::InvalidConfig(
                    "label must not contain NUL bytes".to_owned(),
                ));
            }
        }
        if self.mode == PoolMode::Adaptive {
            let adaptive = &self.adaptive;
            if adaptive.sample_interval_ms == 0 {
                return Err(Error::InvalidConfig(
                    "sample_interval_ms must be at least 1".to_owned(),
                ));
            }
            if adaptive.idle_timeout_ms == 0 {
                return Err(Error::InvalidConfig(
                    "idle_timeout_ms must be at least 1".to_owned(),
                ));
            }
            if adaptive.grow_debounce_ms >= adaptive.idle_timeout_ms {
                return Err(Error::InvalidConfig(format!(
                    "grow_debounce_ms ({}) must be shorter than idle_timeout_ms ({})",
                    adaptive.grow_debounce_ms, adaptive.idle_timeout_ms
                )));
            }
        }
        Ok(())
    }
}
