use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18900;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (overseer.toml + OVERSEER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverseerConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Which task store backend to wire in at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// SQLite database file (sqlite backend).
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Task definition file (json backend). History lives in a sibling file.
    #[serde(default = "default_tasks_path")]
    pub tasks_path: String,
    /// History entries older than this are removed by the retention sweep.
    #[serde(default = "default_history_max_age_days")]
    pub history_max_age_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            tasks_path: default_tasks_path(),
            history_max_age_days: default_history_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Pause after a failed scan before the next attempt.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    /// Grace period between SIGTERM and SIGKILL when stopping a task.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
    /// Lines of combined output kept per task in the live status record.
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
    /// Interpreter used when a task has no execute_path of its own.
    #[serde(default = "default_interpreter")]
    pub default_interpreter: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            kill_grace_secs: default_kill_grace(),
            output_tail_lines: default_output_tail_lines(),
            default_interpreter: default_interpreter(),
        }
    }
}

/// Outbound webhook alert settings. Alerts are disabled when `url` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertsConfig {
    pub url: Option<String>,
    /// When set, request bodies are signed with HMAC-SHA256
    /// (X-Overseer-Signature-256: sha256=<hex>).
    pub secret: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_backend() -> StorageBackend {
    StorageBackend::Json
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.overseer/overseer.db", home)
}
fn default_tasks_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.overseer/tasks.json", home)
}
fn default_history_max_age_days() -> u32 {
    30
}
fn default_poll_interval() -> u64 {
    30
}
fn default_error_backoff() -> u64 {
    5
}
fn default_kill_grace() -> u64 {
    5
}
fn default_output_tail_lines() -> usize {
    10
}
fn default_interpreter() -> String {
    "python3".to_string()
}

impl OverseerConfig {
    /// Load config from a TOML file with OVERSEER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.overseer/overseer.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OverseerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OVERSEER_").split("_"))
            .extract()
            .map_err(|e| crate::error::OverseerError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.overseer/overseer.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OverseerConfig::default();
        assert_eq!(cfg.scheduler.poll_interval_secs, 30);
        assert_eq!(cfg.scheduler.kill_grace_secs, 5);
        assert_eq!(cfg.storage.backend, StorageBackend::Json);
        assert!(cfg.alerts.url.is_none());
    }

    #[test]
    fn backend_tag_round_trips() {
        let v: StorageBackend = serde_json::from_str("\"sqlite\"").unwrap();
        assert_eq!(v, StorageBackend::Sqlite);
        assert_eq!(serde_json::to_string(&StorageBackend::Memory).unwrap(), "\"memory\"");
    }
}
