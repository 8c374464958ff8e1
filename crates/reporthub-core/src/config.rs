use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default cadence of the due-schedule poll loop.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
/// Default cap on one report execution, query engine included.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;
/// Default liveness window: in-flight executions older than this are
/// considered abandoned and recovered as failed.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 1800;
/// Default upper bound on due schedules processed per poll cycle.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Top-level config (reporthub.toml + REPORTHUB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReporthubConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Per-tenant settings keyed by tenant id. Serves as the tenant
    /// directory and capability source when no external service is wired.
    #[serde(default)]
    pub tenants: HashMap<String, TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduling-loop knobs. All durations in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            execution_timeout_secs: default_execution_timeout(),
            stale_after_secs: default_stale_after(),
            batch_size: default_batch_size(),
        }
    }
}

/// Where the daemon's HTTP query-executor client points.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorConfig {
    /// Base URL of the query engine, without trailing slash.
    pub base_url: Option<String>,
    /// Bearer token sent with every execution request.
    pub api_token: Option<String>,
}

/// Where the daemon's HTTP mail-gateway client points.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliveryConfig {
    /// Endpoint of the mail gateway, receives one POST per recipient.
    pub endpoint: Option<String>,
    /// Sender address forwarded to the gateway.
    pub from_address: Option<String>,
}

/// Static per-tenant settings used by the config-backed collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantConfig {
    /// Email domains considered internal for this tenant.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Users permitted to create and modify schedules for this tenant.
    #[serde(default)]
    pub schedulers: Vec<String>,
}

impl ReporthubConfig {
    /// Load config: explicit path > REPORTHUB_CONFIG env > ~/.reporthub/reporthub.toml.
    ///
    /// Env variables override file values; a double underscore separates
    /// the section from the field (field names themselves contain single
    /// underscores), e.g. `REPORTHUB_SCHEDULER__POLL_INTERVAL_SECS=5` or
    /// `REPORTHUB_DATABASE__PATH=/var/lib/reporthub.db`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ReporthubConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REPORTHUB_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    if let Ok(p) = std::env::var("REPORTHUB_CONFIG") {
        return p;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reporthub/reporthub.toml")
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reporthub/reporthub.db")
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_execution_timeout() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}

fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ReporthubConfig::default();
        assert_eq!(cfg.scheduler.poll_interval_secs, 15);
        assert_eq!(cfg.scheduler.execution_timeout_secs, 300);
        assert_eq!(cfg.scheduler.stale_after_secs, 1800);
        assert_eq!(cfg.scheduler.batch_size, 50);
        assert!(cfg.database.path.ends_with("reporthub.db"));
    }

    #[test]
    fn env_override_reaches_fields_with_underscored_names() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("REPORTHUB_SCHEDULER__POLL_INTERVAL_SECS", "5");
            jail.set_env("REPORTHUB_DATABASE__PATH", "/tmp/override.db");
            let cfg: ReporthubConfig = Figment::new()
                .merge(Env::prefixed("REPORTHUB_").split("__"))
                .extract()?;
            assert_eq!(cfg.scheduler.poll_interval_secs, 5);
            assert_eq!(cfg.database.path, "/tmp/override.db");
            // The rest of the section keeps its defaults.
            assert_eq!(cfg.scheduler.batch_size, 50);
            Ok(())
        });
    }

    #[test]
    fn tenant_section_parses() {
        let cfg: ReporthubConfig = Figment::new()
            .merge(figment::providers::Toml::string(
                r#"
                [tenants.acme]
                allowed_domains = ["acme.com", "corp.acme.com"]
                schedulers = ["u-1"]
                "#,
            ))
            .extract()
            .unwrap();
        let acme = cfg.tenants.get("acme").unwrap();
        assert_eq!(acme.allowed_domains.len(), 2);
        assert_eq!(acme.schedulers, vec!["u-1"]);
    }
}
