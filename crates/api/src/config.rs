use std::collections::HashMap;
use std::time::Duration;

use kiln_core::replenish::ReplenishmentConfig;
use kiln_engine::MonitorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Base URL of the render service.
    pub render_url: String,
    /// Milliseconds between poll cycles.
    pub poll_interval_ms: u64,
    /// Default seconds before an unseen job times out.
    pub job_timeout_secs: i64,
    /// Per-job-type timeout overrides, parsed from `JOB_TIMEOUT_OVERRIDES`.
    pub job_timeout_overrides: HashMap<String, i64>,
    /// Job type submitted by replenishment batches.
    pub job_type: String,
    /// Replenishment throttles.
    pub replenish: ReplenishmentConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                       |
    /// | `RENDER_URL`              | `http://localhost:8188`    |
    /// | `POLL_INTERVAL_MS`        | `2000`                     |
    /// | `JOB_TIMEOUT_SECS`        | `300`                      |
    /// | `JOB_TIMEOUT_OVERRIDES`   | (empty; `type=secs,...`)   |
    /// | `JOB_TYPE`                | `portrait`                 |
    /// | `REPLENISH_TARGET`        | `10`                       |
    /// | `REPLENISH_BATCH_SIZE`    | `4`                        |
    /// | `REPLENISH_COOLDOWN_SECS` | `300`                      |
    /// | `REPLENISH_MAX_DAILY`     | `24`                       |
    /// | `REPLENISH_MAX_REJECTS`   | `5`                        |
    /// | `REPLENISH_MAX_CONCURRENT`| `3`                        |
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let replenish = ReplenishmentConfig {
            target: env_parse("REPLENISH_TARGET", "10"),
            batch_size: env_parse("REPLENISH_BATCH_SIZE", "4"),
            cooldown_secs: env_parse("REPLENISH_COOLDOWN_SECS", "300"),
            max_daily: env_parse("REPLENISH_MAX_DAILY", "24"),
            max_consecutive_rejects: env_parse("REPLENISH_MAX_REJECTS", "5"),
            max_concurrent: env_parse("REPLENISH_MAX_CONCURRENT", "3"),
        };

        Self {
            host,
            port: env_parse("PORT", "3000"),
            cors_origins,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", "30"),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", "30"),
            render_url: env_or("RENDER_URL", "http://localhost:8188"),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", "2000"),
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS", "300"),
            job_timeout_overrides: parse_timeout_overrides(&env_or("JOB_TIMEOUT_OVERRIDES", "")),
            job_type: env_or("JOB_TYPE", "portrait"),
            replenish,
        }
    }

    /// Monitor tunables derived from this configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            default_timeout_secs: self.job_timeout_secs,
            timeout_overrides: self.job_timeout_overrides.clone(),
            ..MonitorConfig::default()
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: &str) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(name, default)
        .parse()
        .unwrap_or_else(|e| panic!("{name} is invalid: {e}"))
}

/// Parse `type=secs,type=secs` pairs. Malformed pairs are rejected at
/// startup so a typo never silently falls back to the default timeout.
fn parse_timeout_overrides(raw: &str) -> HashMap<String, i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (job_type, secs) = pair
                .split_once('=')
                .unwrap_or_else(|| panic!("JOB_TIMEOUT_OVERRIDES entry '{pair}' is not type=secs"));
            let secs: i64 = secs
                .trim()
                .parse()
                .unwrap_or_else(|e| panic!("JOB_TIMEOUT_OVERRIDES entry '{pair}': {e}"));
            (job_type.trim().to_string(), secs)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_overrides_parse_pairs() {
        let overrides = parse_timeout_overrides("video=1800, portrait=600");
        assert_eq!(overrides.get("video"), Some(&1800));
        assert_eq!(overrides.get("portrait"), Some(&600));
    }

    #[test]
    fn timeout_overrides_empty_input() {
        assert!(parse_timeout_overrides("").is_empty());
    }

    #[test]
    #[should_panic]
    fn timeout_overrides_reject_malformed_pair() {
        parse_timeout_overrides("video");
    }
}
