use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_WORKER_COUNT: usize = 20;
pub const MAX_WORKER_COUNT: usize = 100;
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 30;
pub const DEFAULT_MAX_INSTANCES: u32 = 3;
/// How long a dispatch may wait for a free worker before the occurrence is coalesced.
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 250;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Engine tuning knobs consumed by `cadence-scheduler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Upper bound on concurrently executing job bodies across all jobs.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// IANA timezone name used by cron triggers that don't name their own.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Seconds an occurrence may run late before it is treated as misfired.
    #[serde(default = "default_misfire_grace_time")]
    pub default_misfire_grace_time: u64,
    #[serde(default = "default_max_instances")]
    pub default_max_instances: u32,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            timezone: DEFAULT_TIMEZONE.to_string(),
            default_misfire_grace_time: DEFAULT_MISFIRE_GRACE_SECS,
            default_max_instances: DEFAULT_MAX_INSTANCES,
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT_MS,
        }
    }
}

impl SchedulerSettings {
    /// Parse the configured timezone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CoreError::Timezone(self.timezone.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(CoreError::Config(format!(
                "scheduler.worker_count must be between 1 and {MAX_WORKER_COUNT}, got {}",
                self.worker_count
            )));
        }
        if self.default_max_instances == 0 {
            return Err(CoreError::Config(
                "scheduler.default_max_instances must be at least 1".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_misfire_grace_time() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_max_instances() -> u32 {
    DEFAULT_MAX_INSTANCES
}
fn default_submit_timeout_ms() -> u64 {
    DEFAULT_SUBMIT_TIMEOUT_MS
}

impl CadenceConfig {
    /// Build the layered figment: defaults, then the TOML file, then `CADENCE_*`
    /// env vars (nested keys separated by `__`, e.g. `CADENCE_SCHEDULER__WORKER_COUNT`).
    ///
    /// Returned as-is so callers can pull extra sections (the daemon's seed jobs)
    /// out of the same sources.
    pub fn figment(config_path: Option<&str>) -> Figment {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }

    /// Load config from a TOML file with CADENCE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::from_figment(&Self::figment(config_path))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: CadenceConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.scheduler.validate()?;
        tracing::debug!(
            worker_count = config.scheduler.worker_count,
            timezone = %config.scheduler.timezone,
            "configuration loaded"
        );
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
