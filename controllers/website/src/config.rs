//! Controller configuration.
//!
//! All settings come from environment variables, read once at startup.

use crate::error::ControllerError;
use std::time::Duration;

const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RESYNC_PERIOD_SECS: u64 = 30;

/// Runtime configuration of the Website Controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch (`None` = all namespaces)
    pub namespace: Option<String>,
    /// Number of concurrent workers draining the queue
    pub workers: usize,
    /// How long to wait for the informer caches before giving up
    pub cache_sync_timeout: Duration,
    /// Interval at which cached objects are re-delivered to the handlers (`None` = never)
    pub resync_period: Option<Duration>,
    /// Instance name reported on published events
    pub pod_name: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: DEFAULT_WORKER_COUNT,
            cache_sync_timeout: Duration::from_secs(DEFAULT_CACHE_SYNC_TIMEOUT_SECS),
            resync_period: Some(Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS)),
            pod_name: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Recognised variables:
    /// - `WATCH_NAMESPACE`
    /// - `WORKER_COUNT` (at least 1)
    /// - `CACHE_SYNC_TIMEOUT_SECS`
    /// - `RESYNC_PERIOD_SECS` (0 disables resync)
    /// - `POD_NAME`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let workers = match non_empty("WORKER_COUNT") {
            Some(raw) => parse_number::<usize>("WORKER_COUNT", &raw)?,
            None => DEFAULT_WORKER_COUNT,
        };
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }

        let cache_sync_timeout = match non_empty("CACHE_SYNC_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("CACHE_SYNC_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(DEFAULT_CACHE_SYNC_TIMEOUT_SECS),
        };

        let resync_secs = match non_empty("RESYNC_PERIOD_SECS") {
            Some(raw) => parse_number("RESYNC_PERIOD_SECS", &raw)?,
            None => DEFAULT_RESYNC_PERIOD_SECS,
        };

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            workers,
            cache_sync_timeout,
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            pod_name: non_empty("POD_NAME"),
        })
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        ControllerError::InvalidConfig(format!(
            "{key} must be a non-negative integer, got '{raw}': {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.workers, 2);
        assert_eq!(config.resync_period, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "sites"),
            ("WORKER_COUNT", "8"),
            ("CACHE_SYNC_TIMEOUT_SECS", "5"),
            ("RESYNC_PERIOD_SECS", "120"),
            ("POD_NAME", "website-controller-7d9f"),
        ]))
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("sites"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.cache_sync_timeout, Duration::from_secs(5));
        assert_eq!(config.resync_period, Some(Duration::from_secs(120)));
        assert_eq!(config.pod_name.as_deref(), Some("website-controller-7d9f"));
    }

    #[test]
    fn test_zero_resync_disables_resync() {
        let config = ControllerConfig::from_lookup(lookup(&[("RESYNC_PERIOD_SECS", "0")])).unwrap();
        assert_eq!(config.resync_period, None);
    }

    #[test]
    fn test_empty_namespace_means_all_namespaces() {
        let config = ControllerConfig::from_lookup(lookup(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = ControllerConfig::from_lookup(lookup(&[("WORKER_COUNT", "0")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_garbage_numbers() {
        let err = ControllerConfig::from_lookup(lookup(&[("CACHE_SYNC_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CACHE_SYNC_TIMEOUT_SECS"));
        assert!(err.to_string().contains("invalid digit"), "{err}");
    }
}
