//! Engine timeouts and their environment overrides

use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_AZURE_CALL_TIMEOUT, DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT,
    DEFAULT_POLL_INTERVAL, DEFAULT_REQUEUE_AFTER,
};

/// Environment variable overriding the Azure call timeout (milliseconds)
pub const AZURE_CALL_TIMEOUT_ENV: &str = "CAPZ_AZURE_CALL_TIMEOUT_MS";
/// Environment variable overriding the service reconcile timeout (milliseconds)
pub const SERVICE_RECONCILE_TIMEOUT_ENV: &str = "CAPZ_SERVICE_RECONCILE_TIMEOUT_MS";
/// Environment variable overriding the requeue delay (milliseconds)
pub const REQUEUE_AFTER_ENV: &str = "CAPZ_REQUEUE_AFTER_MS";
/// Environment variable overriding the LRO poll interval (milliseconds)
pub const POLL_INTERVAL_ENV: &str = "CAPZ_POLL_INTERVAL_MS";

/// Timeouts used by the reconcile engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Budget for one Azure call, including in-window LRO polling
    pub azure_call: Duration,
    /// Budget for one service's reconcile or delete pass
    pub service_reconcile: Duration,
    /// Delay before the next pass when an operation is still running
    pub requeue_after: Duration,
    /// Interval between LRO polls inside the call budget
    pub poll_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            azure_call: DEFAULT_AZURE_CALL_TIMEOUT,
            service_reconcile: DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TimeoutConfig {
    /// Defaults overridden by any `CAPZ_*_MS` variables in the environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let read = |key: &str, slot: &mut Duration| -> Result<()> {
            if let Some(raw) = lookup(key) {
                let ms: u64 = raw.trim().parse().map_err(|_| {
                    Error::validation_for_field(key, format!("expected milliseconds, got {raw:?}"))
                })?;
                *slot = Duration::from_millis(ms);
            }
            Ok(())
        };
        read(AZURE_CALL_TIMEOUT_ENV, &mut config.azure_call)?;
        read(SERVICE_RECONCILE_TIMEOUT_ENV, &mut config.service_reconcile)?;
        read(REQUEUE_AFTER_ENV, &mut config.requeue_after)?;
        read(POLL_INTERVAL_ENV, &mut config.poll_interval)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = TimeoutConfig::default();
        assert_eq!(c.azure_call, Duration::from_secs(2));
        assert_eq!(c.service_reconcile, Duration::from_secs(12));
        assert_eq!(c.requeue_after, Duration::from_secs(20));
        assert_eq!(c.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_lookup_overrides() {
        let env: HashMap<&str, &str> = [(AZURE_CALL_TIMEOUT_ENV, "5000"), (POLL_INTERVAL_ENV, " 100 ")]
            .into_iter()
            .collect();
        let c = TimeoutConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.azure_call, Duration::from_secs(5));
        assert_eq!(c.poll_interval, Duration::from_millis(100));
        assert_eq!(c.requeue_after, DEFAULT_REQUEUE_AFTER);
    }

    #[test]
    fn test_invalid_override_is_validation_error() {
        let err = TimeoutConfig::from_lookup(|k| {
            (k == REQUEUE_AFTER_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("soon"));
    }
}
