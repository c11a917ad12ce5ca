use std::time::Duration;

use crate::connection::DEFAULT_RECONNECT_DELAY;
use crate::liveness::DEFAULT_PROBE_INTERVAL;
use crate::registry::DEFAULT_POLL_INTERVAL;

/// Default REST base URL of the service.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/sodalite";

/// Default push-channel endpoint.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/sodalite/ws/stats";

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local service. Unparseable
/// values fall back to the default with a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// REST base URL, e.g. `http://host:8000/sodalite`.
    pub api_url: String,
    /// Push-channel WebSocket URL.
    pub ws_url: String,
    pub probe_interval: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                                 |
    /// |------------------------|-----------------------------------------|
    /// | `SODALITE_API_URL`     | `http://localhost:8000/sodalite`        |
    /// | `SODALITE_WS_URL`      | `ws://localhost:8000/sodalite/ws/stats` |
    /// | `PROBE_INTERVAL_SECS`  | `30`                                    |
    /// | `POLL_INTERVAL_SECS`   | `2`                                     |
    /// | `POLL_INTERVAL_MS`     | -- (overrides `POLL_INTERVAL_SECS`)     |
    /// | `RECONNECT_DELAY_SECS` | `5`                                     |
    /// | `REQUEST_TIMEOUT_SECS` | `15`                                    |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("SODALITE_API_URL").unwrap_or(defaults.api_url);
        let ws_url = lookup("SODALITE_WS_URL").unwrap_or(defaults.ws_url);

        let secs = |key: &str, default: Duration| -> Duration {
            parse_number(&lookup, key)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let poll_interval = parse_number(&lookup, "POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or_else(|| secs("POLL_INTERVAL_SECS", defaults.poll_interval));

        Self {
            api_url,
            ws_url,
            probe_interval: secs("PROBE_INTERVAL_SECS", defaults.probe_interval),
            poll_interval,
            reconnect_delay: secs("RECONNECT_DELAY_SECS", defaults.reconnect_delay),
            request_timeout: secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
        }
    }
}

/// Parse a positive integer variable; zero and garbage are ignored.
fn parse_number<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid duration, using default");
            None
        }
    }
}
