//! Configuration for the scheduler.

use std::time::Duration;

use anyhow::{Context, Result};
use jobvisor_reconcile::{Capacity, DEFAULT_CYCLE_INTERVAL, DEFAULT_FAN_OUT};

use crate::cluster::KubeConfig;
use crate::creators::DEFAULT_PATCH_TYPES;
use crate::db::DbConfig;
use crate::scheduler::{CycleConfig, WorkerConfig};

/// Cluster size simulated by dry runs unless overridden.
pub const DEFAULT_DRY_RUN_CAPACITY: Capacity = Capacity {
    cpu: 16.0,
    memory_bytes: 64 << 30,
    slots: 32,
};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Run migrations on startup.
    pub dev_mode: bool,

    /// Use an in-memory cluster instead of the Kubernetes API.
    pub dry_run: bool,

    /// Capacity the in-memory cluster reports in dry runs.
    pub dry_run_capacity: Capacity,

    /// Time between scheduling cycles.
    pub interval: Duration,

    /// Maximum concurrent start or terminate calls per batch.
    pub fan_out: usize,

    /// Capacity held back for infrastructure.
    pub reserved: Capacity,

    /// Patch types the patching creator fans out over.
    pub patch_types: Vec<String>,

    pub kube: KubeConfig,
    pub database: DbConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("JOBVISOR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let dev_mode = env_flag("JOBVISOR_DEV");
        let dry_run = env_flag("JOBVISOR_DRY_RUN");

        let interval = env_parse("JOBVISOR_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CYCLE_INTERVAL);
        let fan_out = env_parse("JOBVISOR_FAN_OUT")?.unwrap_or(DEFAULT_FAN_OUT);

        let reserved = env_capacity("JOBVISOR_RESERVED", Capacity::default())?;
        let dry_run_capacity = env_capacity("JOBVISOR_DRY_RUN", DEFAULT_DRY_RUN_CAPACITY)?;

        let patch_types = std::env::var("JOBVISOR_PATCH_TYPES")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| DEFAULT_PATCH_TYPES.iter().map(|s| s.to_string()).collect());

        let defaults = KubeConfig::default();
        let kube = KubeConfig {
            api_url: std::env::var("JOBVISOR_KUBE_API_URL").unwrap_or(defaults.api_url),
            namespace: std::env::var("JOBVISOR_KUBE_NAMESPACE").unwrap_or(defaults.namespace),
            token_path: match std::env::var("JOBVISOR_KUBE_TOKEN_PATH") {
                Ok(path) if path.is_empty() => None,
                Ok(path) => Some(path),
                Err(_) => defaults.token_path,
            },
            timeout: env_parse("JOBVISOR_KUBE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            worker_image: std::env::var("JOBVISOR_WORKER_IMAGE").unwrap_or(defaults.worker_image),
        };

        let database = DbConfig::from_env();

        Ok(Self {
            log_level,
            dev_mode,
            dry_run,
            dry_run_capacity,
            interval,
            fan_out,
            reserved,
            patch_types,
            kube,
            database,
        })
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            fan_out: self.fan_out,
            reserved: self.reserved,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            interval: self.interval,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Read `{prefix}_CPU`, `{prefix}_MEMORY_BYTES` and `{prefix}_SLOTS`.
fn env_capacity(prefix: &str, default: Capacity) -> Result<Capacity> {
    Ok(Capacity {
        cpu: env_parse(&format!("{prefix}_CPU"))?.unwrap_or(default.cpu),
        memory_bytes: env_parse(&format!("{prefix}_MEMORY_BYTES"))?
            .unwrap_or(default.memory_bytes),
        slots: env_parse(&format!("{prefix}_SLOTS"))?.unwrap_or(default.slots),
    })
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("reassembler, detour,,"), vec!["reassembler", "detour"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("JOBVISOR_TEST_BAD_NUMBER", "twelve");
        assert!(env_parse::<u64>("JOBVISOR_TEST_BAD_NUMBER").is_err());

        std::env::set_var("JOBVISOR_TEST_GOOD_NUMBER", " 12 ");
        assert_eq!(env_parse::<u64>("JOBVISOR_TEST_GOOD_NUMBER").unwrap(), Some(12));

        assert_eq!(env_parse::<u64>("JOBVISOR_TEST_UNSET_NUMBER").unwrap(), None);
    }

    #[test]
    fn test_env_capacity_overrides_default_per_field() {
        std::env::set_var("JOBVISOR_TEST_CAP_SLOTS", "4");

        let capacity = env_capacity("JOBVISOR_TEST_CAP", DEFAULT_DRY_RUN_CAPACITY).unwrap();
        assert_eq!(capacity.cpu, DEFAULT_DRY_RUN_CAPACITY.cpu);
        assert_eq!(capacity.memory_bytes, DEFAULT_DRY_RUN_CAPACITY.memory_bytes);
        assert_eq!(capacity.slots, 4);

        let untouched = env_capacity("JOBVISOR_TEST_NOCAP", Capacity::default()).unwrap();
        assert_eq!(untouched, Capacity::default());
    }

    #[test]
    fn test_default_dry_run_capacity_is_usable() {
        assert!(DEFAULT_DRY_RUN_CAPACITY.cpu >= 1.0);
        assert!(DEFAULT_DRY_RUN_CAPACITY.memory_bytes >= 16 << 30);
        assert!(DEFAULT_DRY_RUN_CAPACITY.slots >= 1);
    }
}
