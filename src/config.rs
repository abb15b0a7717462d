use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::info;

use crate::error::QcError;
use crate::qc::QcRegistry;

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON registry replacing the built-in one
    pub registry_path: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub parameter_concurrency: usize,
    pub spatial_concurrency: usize,
    pub grid: TimeDelta,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_path: None,
            fetch_timeout: Duration::from_secs(30),
            parameter_concurrency: 8,
            spatial_concurrency: 4,
            grid: TimeDelta::minutes(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            registry_path: env::var("QC_CONFIG_PATH").ok().map(PathBuf::from),
            fetch_timeout: Duration::from_secs(env_or("QC_FETCH_TIMEOUT_SECS", 30)),
            parameter_concurrency: env_or("QC_PARAMETER_CONCURRENCY", 8),
            spatial_concurrency: env_or("QC_SPATIAL_CONCURRENCY", 4),
            grid: grid_from_env(),
        }
    }

    /// The registry file if one is configured, the built-in registry otherwise
    pub fn load_registry(&self) -> Result<QcRegistry, QcError> {
        match &self.registry_path {
            Some(path) => QcRegistry::from_json_file(path),
            None => {
                info!("Using built-in QC registry");
                Ok(QcRegistry::global().clone())
            }
        }
    }
}

/// Out-of-range or non-positive grids fall back to the default
fn grid_from_env() -> TimeDelta {
    TimeDelta::try_minutes(env_or("QC_GRID_MINUTES", 5))
        .filter(|grid| *grid > TimeDelta::zero())
        .unwrap_or(TimeDelta::minutes(5))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
