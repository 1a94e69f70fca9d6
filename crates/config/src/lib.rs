use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Handle the persona posts under, used for logging and self-mention checks.
    pub handle: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Magenta".to_string(),
            handle: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the agent service hosting the persona and its archival
    /// passage store.  Overridden at runtime by `MAGENTA_REMOTE_BASE_URL`.
    pub base_url: String,
    pub api_key: String,
    /// Remote agent id the scheduler wakes and mirrors state against.
    pub agent_id: String,
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            agent_id: String::new(),
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
    /// Full remote state pull and push happen every N ticks; quiet mode is
    /// synced from remote every tick regardless.
    pub full_sync_ticks: u64,
    /// Run the outbox cleanup sweep every N emissions of maintenance-class
    /// signals.
    pub cleanup_every_emissions: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            full_sync_ticks: 5,
            cleanup_every_emissions: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub state_dir: String,
    pub outbox_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: "state".to_string(),
            outbox_dir: "outbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub min_confidence: f64,
    pub max_post_length: usize,
    pub cooldown_seconds: u64,
    pub dedupe_ttl_hours: u64,
    pub require_fresh_sync: bool,
    pub epsilon: f64,
    pub temperature: f64,
    pub low_salience_threshold: f64,
    pub high_salience_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            max_post_length: 300,
            cooldown_seconds: 30,
            dedupe_ttl_hours: 24,
            require_fresh_sync: true,
            epsilon: 0.15,
            temperature: 0.8,
            low_salience_threshold: 0.35,
            high_salience_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("MAGENTA_REMOTE_BASE_URL") {
            if !value.is_empty() {
                config.remote.base_url = value;
            }
        }
        if let Ok(value) = env::var("MAGENTA_API_KEY") {
            if !value.is_empty() {
                config.remote.api_key = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Commands that talk to the remote service call this first; commands
    /// that only touch local state skip it.
    pub fn require_remote(&self) -> Result<()> {
        if self.remote.api_key.trim().is_empty() {
            bail!("remote api_key missing; set [remote].api_key or MAGENTA_API_KEY");
        }
        if self.remote.agent_id.trim().is_empty() {
            bail!("remote agent_id missing; set [remote].agent_id in the config file");
        }
        Ok(())
    }
}
