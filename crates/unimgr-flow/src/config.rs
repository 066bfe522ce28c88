//! Runtime configuration for the orchestrator.
//!
//! Every setting has a default and may be overridden from the process
//! environment. Values are validated strictly: a present but malformed value
//! is an error, never silently replaced by its default.

use std::time::Duration;

use unimgr_core::LogFormat;

use crate::error::{Error, Result};

const ENV_REKEY_INTERVAL_SECS: &str = "UNIMGR_REKEY_INTERVAL_SECS";
const ENV_MAX_CONCURRENT_TASKS: &str = "UNIMGR_MAX_CONCURRENT_TASKS";
const ENV_SUBTASK_TIMEOUT_SECS: &str = "UNIMGR_SUBTASK_TIMEOUT_SECS";
const ENV_LOG_FORMAT: &str = "UNIMGR_LOG_FORMAT";

const DEFAULT_REKEY_INTERVAL_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENT_TASKS: u64 = 10;
const DEFAULT_SUBTASK_TIMEOUT_SECS: u64 = 600;

/// Orchestrator runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Period of the background rekey job.
    pub rekey_interval: Duration,
    /// Maximum lifecycle operations executing at once.
    pub max_concurrent_tasks: usize,
    /// Upper bound on a single subtask's execution time.
    pub subtask_timeout: Duration,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rekey_interval: Duration::from_secs(DEFAULT_REKEY_INTERVAL_SECS),
            max_concurrent_tasks: usize::try_from(DEFAULT_MAX_CONCURRENT_TASKS).unwrap_or(10),
            subtask_timeout: Duration::from_secs(DEFAULT_SUBTASK_TIMEOUT_SECS),
            log_format: LogFormat::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but invalid.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rekey_interval_secs =
            parse_positive_u64_env(&get_env, ENV_REKEY_INTERVAL_SECS, DEFAULT_REKEY_INTERVAL_SECS)?;
        let max_concurrent_tasks = parse_positive_u64_env(
            &get_env,
            ENV_MAX_CONCURRENT_TASKS,
            DEFAULT_MAX_CONCURRENT_TASKS,
        )?;
        let subtask_timeout_secs = parse_positive_u64_env(
            &get_env,
            ENV_SUBTASK_TIMEOUT_SECS,
            DEFAULT_SUBTASK_TIMEOUT_SECS,
        )?;
        let log_format = match get_env(ENV_LOG_FORMAT) {
            None => LogFormat::default(),
            Some(raw) => LogFormat::parse(&raw).ok_or_else(|| {
                Error::configuration(format!(
                    "{ENV_LOG_FORMAT} must be 'json' or 'pretty', got '{raw}'"
                ))
            })?,
        };

        let max_concurrent_tasks = usize::try_from(max_concurrent_tasks).map_err(|_| {
            Error::configuration(format!(
                "{ENV_MAX_CONCURRENT_TASKS} value {max_concurrent_tasks} exceeds supported range"
            ))
        })?;

        Ok(Self {
            rekey_interval: Duration::from_secs(rekey_interval_secs),
            max_concurrent_tasks,
            subtask_timeout: Duration::from_secs(subtask_timeout_secs),
            log_format,
        })
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() -> Result<()> {
        let config = OrchestratorConfig::from_env_with(env(&[]))?;
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.rekey_interval, Duration::from_secs(120));
        assert_eq!(config.max_concurrent_tasks, 10);
        Ok(())
    }

    #[test]
    fn overrides_are_parsed() -> Result<()> {
        let config = OrchestratorConfig::from_env_with(env(&[
            (ENV_REKEY_INTERVAL_SECS, "30"),
            (ENV_MAX_CONCURRENT_TASKS, "4"),
            (ENV_SUBTASK_TIMEOUT_SECS, "90"),
            (ENV_LOG_FORMAT, "JSON"),
        ]))?;
        assert_eq!(config.rekey_interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.subtask_timeout, Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn zero_is_rejected() {
        let err = OrchestratorConfig::from_env_with(env(&[(ENV_MAX_CONCURRENT_TASKS, "0")]));
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = OrchestratorConfig::from_env_with(env(&[(ENV_REKEY_INTERVAL_SECS, "soon")]));
        assert!(matches!(err, Err(Error::Configuration { .. })));

        let err = OrchestratorConfig::from_env_with(env(&[(ENV_LOG_FORMAT, "xml")]));
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }
}
