//! linkcheck.toml configuration parser.
//!
//! Every field has a default, so an absent file or an empty one yields a
//! working daemon. Durations are written as `"500ms"`, `"15s"`, `"9m"`, or
//! `"1h"`.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use linkcheck_engine::{QueueConfig, RetentionConfig};
use linkcheck_probe::ProbeConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub queue: QueueSection,
    pub retention: RetentionSection,
    pub probe: ProbeSection,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/linkcheck"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Time one sub-job delivery may run before yielding.
    pub time_budget: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            time_budget: "570s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub concurrency: usize,
    pub backoff_base: String,
    pub backoff_max: String,
    pub max_attempts: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            concurrency: 8,
            backoff_base: "1s".to_string(),
            backoff_max: "60s".to_string(),
            max_attempts: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub interval: String,
    pub max_age_days: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub timeout: String,
    /// Outbound fetches allowed per minute across all workers. Unset means
    /// unlimited.
    pub max_calls_per_minute: Option<u32>,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout: "15s".to_string(),
            max_calls_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept requests without a shared key.
    pub dev_mode: bool,
    /// Use this key instead of a generated one.
    pub shared_key: Option<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn queue_config(&self) -> anyhow::Result<QueueConfig> {
        Ok(QueueConfig {
            concurrency: self.queue.concurrency,
            time_budget: duration_field("worker.time_budget", &self.worker.time_budget)?,
            backoff_base: duration_field("queue.backoff_base", &self.queue.backoff_base)?,
            backoff_max: duration_field("queue.backoff_max", &self.queue.backoff_max)?,
            max_attempts: self.queue.max_attempts,
        })
    }

    pub fn retention_config(&self) -> anyhow::Result<RetentionConfig> {
        Ok(RetentionConfig {
            interval: duration_field("retention.interval", &self.retention.interval)?,
            max_age_days: self.retention.max_age_days,
        })
    }

    pub fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        Ok(ProbeConfig {
            timeout: duration_field("probe.timeout", &self.probe.timeout)?,
            max_calls_per_minute: self.probe.max_calls_per_minute.and_then(NonZeroU32::new),
        })
    }
}

fn duration_field(name: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).with_context(|| format!("{name}: invalid duration {value:?}"))
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 60 * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
