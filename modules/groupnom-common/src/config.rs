use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage. Absent → in-memory catalog and session store.
    pub database_url: Option<String>,
    /// JSON file of restaurants loaded into the in-memory catalog.
    pub catalog_path: Option<String>,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Sessions
    pub session_ttl: Duration,
    pub candidate_limit: usize,
    pub fallback_candidate_limit: usize,
    pub cas_max_attempts: u32,

    // Selection
    pub chain_cache_ttl: Duration,

    pub polling: PollingConfig,
}

/// Client polling schedule: a short interval while a session is fresh, a
/// longer one once it has been waiting past the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollingConfig {
    pub interval: Duration,
    pub long_wait_interval: Duration,
    pub long_wait_threshold: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3_000),
            long_wait_interval: Duration::from_millis(10_000),
            long_wait_threshold: Duration::from_secs(120),
        }
    }
}

impl PollingConfig {
    pub fn interval_after(&self, elapsed: Duration) -> Duration {
        if elapsed >= self.long_wait_threshold {
            self.long_wait_interval
        } else {
            self.interval
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            catalog_path: None,
            web_host: "0.0.0.0".to_string(),
            web_port: 3000,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            candidate_limit: 10,
            fallback_candidate_limit: 5,
            cas_max_attempts: 16,
            chain_cache_ttl: Duration::from_secs(3600),
            polling: PollingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let config = Self {
            database_url: optional_env("DATABASE_URL"),
            catalog_path: optional_env("CATALOG_PATH"),
            web_host: env::var("WEB_HOST").unwrap_or(defaults.web_host),
            web_port: parse_env("WEB_PORT", defaults.web_port)?,
            session_ttl: Duration::from_secs(
                parse_env::<u64>("SESSION_TTL_HOURS", defaults.session_ttl.as_secs() / 3600)? * 3600,
            ),
            candidate_limit: parse_env("CANDIDATE_LIMIT", defaults.candidate_limit)?,
            fallback_candidate_limit: parse_env(
                "FALLBACK_CANDIDATE_LIMIT",
                defaults.fallback_candidate_limit,
            )?,
            cas_max_attempts: parse_env("CAS_MAX_ATTEMPTS", defaults.cas_max_attempts)?,
            chain_cache_ttl: Duration::from_secs(parse_env(
                "CHAIN_CACHE_TTL_SECS",
                defaults.chain_cache_ttl.as_secs(),
            )?),
            polling: PollingConfig {
                interval: Duration::from_millis(parse_env(
                    "POLL_INTERVAL_MS",
                    defaults.polling.interval.as_millis() as u64,
                )?),
                long_wait_interval: Duration::from_millis(parse_env(
                    "POLL_LONG_WAIT_INTERVAL_MS",
                    defaults.polling.long_wait_interval.as_millis() as u64,
                )?),
                long_wait_threshold: Duration::from_secs(parse_env(
                    "POLL_LONG_WAIT_THRESHOLD_SECS",
                    defaults.polling.long_wait_threshold.as_secs(),
                )?),
            },
        };

        if config.candidate_limit == 0 {
            anyhow::bail!("CANDIDATE_LIMIT must be at least 1");
        }
        if config.cas_max_attempts == 0 {
            anyhow::bail!("CAS_MAX_ATTEMPTS must be at least 1");
        }

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
        tracing::info!("  CATALOG_PATH: {}", preview_opt(&self.catalog_path));
        tracing::info!(
            ttl_hours = self.session_ttl.as_secs() / 3600,
            candidate_limit = self.candidate_limit,
            fallback_limit = self.fallback_candidate_limit,
            "  session settings"
        );
    }
}

/// First 11 characters and the length, never the whole value.
fn preview_opt(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => {
            let head: String = v.chars().take(11).collect();
            format!("{head}...({} chars)", v.chars().count())
        }
        _ => "<not set>".to_string(),
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_backs_off_after_threshold() {
        let polling = PollingConfig::default();
        assert_eq!(polling.interval_after(Duration::from_secs(5)), Duration::from_millis(3_000));
        assert_eq!(
            polling.interval_after(Duration::from_secs(120)),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn preview_cuts_on_character_boundaries() {
        // Byte 11 falls inside the second accented letter.
        let path = Some("/srv/crêpé/restaurants.json".to_string());
        assert_eq!(preview_opt(&path), "/srv/crêpé/...(27 chars)");
        assert_eq!(preview_opt(&None), "<not set>");
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        assert_eq!(parse_env("GROUPNOM_TEST_UNSET_VALUE", 42u32).unwrap(), 42);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("GROUPNOM_TEST_BAD_NUMBER", "ten");
        assert!(parse_env::<u32>("GROUPNOM_TEST_BAD_NUMBER", 1).is_err());
        env::remove_var("GROUPNOM_TEST_BAD_NUMBER");
    }
}
