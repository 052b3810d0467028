use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::notifications::Urgency;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub metrics_port: Option<u16>,

    // Feature configs
    pub push: Option<PushConfig>,
    /// Keyed by profile name: quick, normal, complex, background.
    pub timeouts: Option<HashMap<String, TimeoutProfileConfig>>,
    pub circuit_breaker: Option<CircuitBreakerFileConfig>,
    pub retry: Option<RetryConfig>,
    pub dispatch: Option<DispatchConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PushConfig {
    pub relay_url: Option<String>,
    pub relay_timeout_sec: Option<u64>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_subject: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TimeoutProfileConfig {
    pub timeout_ms: Option<u64>,
    pub retry: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CircuitBreakerFileConfig {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub open_timeout_ms: Option<u64>,
    pub monitor_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub batch_size: Option<usize>,
    pub ttl_secs: Option<u64>,
    pub urgency: Option<Urgency>,
    pub default_icon: Option<String>,
    pub default_badge: Option<String>,
    pub default_tag: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
