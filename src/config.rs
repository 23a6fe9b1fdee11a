use crate::autorunner::{AutoRunnerSettings, NotifyPolicy};
use crate::domain::{ProductGroup, TraderId, TraderRef};
use crate::engine::DriftThresholds;
use crate::pipeline::PipelineSettings;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub solver_url: String,
    pub ingest_url: String,
    pub explainer_url: Option<String>,
    pub ingest_timeout_ms: u64,
    pub mc_scenarios: usize,
    pub mc_top_k: usize,
    pub mc_seed: Option<u64>,
    pub drift_warning: f64,
    pub drift_critical: f64,
    pub auto_poll_ms: u64,
    pub auto_cooldown_ms: i64,
    /// `None` when `AUTO_FALLBACK_MS=0`.
    pub auto_fallback_ms: Option<i64>,
    pub auto_history_len: usize,
    pub auto_groups: Vec<ProductGroup>,
    pub notify_threshold_profit: f64,
    pub notify_cooldown_ms: i64,
    pub notifications_paused: bool,
    pub desk_traders: Vec<TraderRef>,
    pub event_bus_capacity: usize,
    pub expiry_sweep_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parsed<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    expect: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("must be {}", expect)))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parsed::<u16>(&env_map, "PORT", "8080", "a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let solver_url = required(&env_map, "SOLVER_URL")?;
        let ingest_url = required(&env_map, "INGEST_URL")?;
        let explainer_url = env_map
            .get("EXPLAINER_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let ingest_timeout_ms = parsed::<u64>(&env_map, "INGEST_TIMEOUT_MS", "30000", "a valid u64")?;
        let mc_scenarios = parsed::<usize>(&env_map, "MC_SCENARIOS", "1000", "a positive integer")?;
        if mc_scenarios == 0 {
            return Err(ConfigError::InvalidValue(
                "MC_SCENARIOS".to_string(),
                "must be a positive integer".to_string(),
            ));
        }
        let mc_top_k = parsed::<usize>(&env_map, "MC_TOP_K", "6", "a valid usize")?;
        let mc_seed = match env_map.get("MC_SEED").map(|s| s.trim()) {
            None | Some("") => None,
            Some(s) => Some(s.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue("MC_SEED".to_string(), "must be a valid u64".to_string())
            })?),
        };

        let drift_warning = parsed::<f64>(&env_map, "DRIFT_WARNING", "0.5", "a number")?;
        let drift_critical = parsed::<f64>(&env_map, "DRIFT_CRITICAL", "1.0", "a number")?;
        if !(drift_warning > 0.0 && drift_warning < drift_critical) {
            return Err(ConfigError::InvalidValue(
                "DRIFT_WARNING".to_string(),
                format!(
                    "must be positive and below DRIFT_CRITICAL ({} vs {})",
                    drift_warning, drift_critical
                ),
            ));
        }

        let auto_poll_ms = parsed::<u64>(&env_map, "AUTO_POLL_MS", "30000", "a valid u64")?;
        let auto_cooldown_ms = parsed::<i64>(&env_map, "AUTO_COOLDOWN_MS", "300000", "a valid i64")?;
        let auto_fallback_ms = match parsed::<i64>(&env_map, "AUTO_FALLBACK_MS", "3600000", "a valid i64")? {
            ms if ms <= 0 => None,
            ms => Some(ms),
        };
        let auto_history_len = parsed::<usize>(&env_map, "AUTO_HISTORY_LEN", "50", "a valid usize")?;
        let auto_groups = parse_groups(&env_map)?;

        let notify_threshold_profit =
            parsed::<f64>(&env_map, "NOTIFY_THRESHOLD_PROFIT", "5000", "a number")?;
        let notify_cooldown_ms =
            parsed::<i64>(&env_map, "NOTIFY_COOLDOWN_MS", "1800000", "a valid i64")?;
        let notifications_paused =
            parsed::<bool>(&env_map, "NOTIFICATIONS_PAUSED", "false", "true or false")?;
        let desk_traders = parse_desk_traders(&env_map)?;
        let event_bus_capacity =
            parsed::<usize>(&env_map, "EVENT_BUS_CAPACITY", "1024", "a valid usize")?;
        let expiry_sweep_ms = parsed::<u64>(&env_map, "EXPIRY_SWEEP_MS", "60000", "a valid u64")?;

        Ok(Config {
            port,
            database_path,
            solver_url,
            ingest_url,
            explainer_url,
            ingest_timeout_ms,
            mc_scenarios,
            mc_top_k,
            mc_seed,
            drift_warning,
            drift_critical,
            auto_poll_ms,
            auto_cooldown_ms,
            auto_fallback_ms,
            auto_history_len,
            auto_groups,
            notify_threshold_profit,
            notify_cooldown_ms,
            notifications_paused,
            desk_traders,
            event_bus_capacity,
            expiry_sweep_ms,
        })
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub fn drift_thresholds(&self) -> DriftThresholds {
        DriftThresholds {
            warning: self.drift_warning,
            critical: self.drift_critical,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            mc_scenarios: self.mc_scenarios,
            mc_top_k: self.mc_top_k,
            mc_seed: self.mc_seed,
            ingest_timeout: self.ingest_timeout(),
        }
    }

    pub fn autorunner_settings(&self) -> AutoRunnerSettings {
        AutoRunnerSettings {
            cooldown_ms: self.auto_cooldown_ms,
            fallback_ms: self.auto_fallback_ms,
            history_len: self.auto_history_len,
            notify: NotifyPolicy {
                threshold_profit: self.notify_threshold_profit,
                cooldown_ms: self.notify_cooldown_ms,
                paused: self.notifications_paused,
            },
            roster: self.desk_traders.clone(),
        }
    }
}

fn parse_groups(env_map: &HashMap<String, String>) -> Result<Vec<ProductGroup>, ConfigError> {
    let raw = env_map
        .get("AUTO_GROUPS")
        .map(|s| s.as_str())
        .unwrap_or("ammonia_domestic");
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ProductGroup>()
                .map_err(|e| ConfigError::InvalidValue("AUTO_GROUPS".to_string(), e.to_string()))
        })
        .collect()
}

/// `DESK_TRADERS=1:Ana Lopez,2:Ben Ortiz`
fn parse_desk_traders(env_map: &HashMap<String, String>) -> Result<Vec<TraderRef>, ConfigError> {
    let Some(raw) = env_map.get("DESK_TRADERS") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let invalid = || {
                ConfigError::InvalidValue(
                    "DESK_TRADERS".to_string(),
                    format!("expected id:name, got {}", entry),
                )
            };
            let (id, name) = entry.split_once(':').ok_or_else(invalid)?;
            let id = id.trim().parse::<i64>().map_err(|_| invalid())?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid());
            }
            Ok(TraderRef {
                id: TraderId::new(id),
                name: name.to_string(),
            })
        })
        .collect()
}
