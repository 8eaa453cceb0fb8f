// Runtime configuration
//
// All knobs come from the environment with the documented defaults.
// Construction is explicit in main; nothing reads env vars at use time.

use std::time::Duration;

/// Tunables shared by the store, stream, and engine
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Session state/metadata/history TTL, refreshed on every write
    pub session_ttl: Duration,

    /// Event log TTL, refreshed on every publish
    pub event_ttl: Duration,

    /// Approximate max events retained per session
    pub event_max_len: usize,

    /// Default history slice for late-joining subscribers
    pub history_limit: usize,

    /// Soft wall-clock budget for one step
    pub step_budget: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(86_400),
            event_ttl: Duration::from_secs(3_600),
            event_max_len: 1_000,
            history_limit: 50,
            step_budget: Duration::from_millis(120_000),
        }
    }
}

impl RuntimeConfig {
    /// Load from environment, falling back to defaults for unset or
    /// unparseable values
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            session_ttl: env_secs("SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            event_ttl: env_secs("EVENT_TTL_SECS").unwrap_or(defaults.event_ttl),
            event_max_len: env_usize("EVENT_MAX_LEN").unwrap_or(defaults.event_max_len),
            history_limit: env_usize("HISTORY_LIMIT").unwrap_or(defaults.history_limit),
            step_budget: env_millis("STEP_BUDGET_MS").unwrap_or(defaults.step_budget),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse().ok().map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_millis)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.event_ttl, Duration::from_secs(3_600));
        assert_eq!(config.event_max_len, 1_000);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.step_budget, Duration::from_millis(120_000));
    }
}
