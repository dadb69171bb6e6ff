//! Process and submission configuration.
//!
//! Process-level settings come from `FARM_*` environment variables once at
//! startup. Submission tuning lives in [`SubmitConfig`], published over a
//! watch channel and snapshotted by the cycle every iteration, so it can be
//! live-reloaded from a TOML file without restarting the process.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    /// TOML file the submission config is live-reloaded from, if any.
    pub submit_config_path: Option<PathBuf>,
    pub database: DbConfig,
    pub submit: SubmitConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("FARM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("FARM_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let submit_config_path = std::env::var("FARM_SUBMIT_CONFIG").ok().map(PathBuf::from);

        let database = DbConfig::from_env();

        let submit = match &submit_config_path {
            Some(path) => SubmitConfig::from_file(path)?,
            None => SubmitConfig::default(),
        };

        Ok(Self {
            log_level,
            dev_mode,
            submit_config_path,
            database,
            submit,
        })
    }
}

/// Submission tuning, re-read by the cycle at the start of every iteration.
///
/// Durations are written as integer seconds in the TOML file
/// (`flag_lifetime = 300`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmitConfig {
    /// How long a queued flag stays eligible before it is skipped.
    #[serde(deserialize_with = "duration_secs")]
    pub flag_lifetime: Duration,

    /// Cap on flags submitted per cycle.
    pub submit_limit: usize,

    /// Target spacing between cycle starts.
    #[serde(deserialize_with = "duration_secs")]
    pub submit_period: Duration,

    /// Name of the scoring backend adapter to submit through.
    pub backend: String,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            flag_lifetime: Duration::from_secs(5 * 60),
            submit_limit: 50,
            submit_period: Duration::from_secs(5),
            backend: "dry-run".to_string(),
        }
    }
}

impl SubmitConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading submit config {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("parsing submit config {}", path.display()))
    }
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Background task that republishes [`SubmitConfig`] when its TOML file
/// changes on disk.
///
/// Polls the file's mtime; a file that fails to parse is logged and the
/// previous config stays in effect, so a bad edit cannot take the
/// scheduler down.
pub struct ConfigReloader {
    path: PathBuf,
    tx: watch::Sender<SubmitConfig>,
    poll_interval: Duration,
}

impl ConfigReloader {
    pub fn new(path: PathBuf, tx: watch::Sender<SubmitConfig>) -> Self {
        Self {
            path,
            tx,
            poll_interval: Duration::from_secs(3),
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), "Starting config reloader");

        let mut last_modified: Option<SystemTime> = None;
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll(&mut last_modified);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Config reloader shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn poll(&self, last_modified: &mut Option<SystemTime>) {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to stat submit config");
                return;
            }
        };

        if *last_modified == Some(modified) {
            return;
        }

        match SubmitConfig::from_file(&self.path) {
            Ok(config) => {
                *last_modified = Some(modified);
                if config != *self.tx.borrow() {
                    info!(
                        backend = %config.backend,
                        submit_limit = config.submit_limit,
                        submit_period_secs = config.submit_period.as_secs(),
                        flag_lifetime_secs = config.flag_lifetime.as_secs(),
                        "Reloaded submit config"
                    );
                    self.tx.send_replace(config);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload submit config; keeping previous");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_config_defaults() {
        let config = SubmitConfig::default();
        assert_eq!(config.flag_lifetime.as_secs(), 300);
        assert_eq!(config.submit_limit, 50);
        assert_eq!(config.submit_period.as_secs(), 5);
        assert_eq!(config.backend, "dry-run");
    }

    #[test]
    fn submit_config_parses_toml_with_partial_overrides() {
        let config: SubmitConfig = toml::from_str(
            r#"
            flag_lifetime = 600
            backend = "themis"
            "#,
        )
        .unwrap();
        assert_eq!(config.flag_lifetime.as_secs(), 600);
        assert_eq!(config.backend, "themis");
        // Unset fields keep their defaults.
        assert_eq!(config.submit_limit, 50);
        assert_eq!(config.submit_period.as_secs(), 5);
    }

    #[test]
    fn submit_config_rejects_unknown_fields() {
        let result = toml::from_str::<SubmitConfig>("flag_ttl = 600\n");
        assert!(result.is_err());
    }
}
