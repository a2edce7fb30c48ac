use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::jobs::dlq::DlqConfig;
use crate::kernel::jobs::retry::{RetryProfile, RetryProfileKind};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub slskd_base_url: String,
    pub slskd_api_key: String,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            slskd_base_url: env::var("SLSKD_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5030".to_string()),
            slskd_api_key: env::var("SLSKD_API_KEY").context("SLSKD_API_KEY must be set")?,
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID").ok(),
            spotify_client_secret: env::var("SPOTIFY_CLIENT_SECRET").ok(),
            worker: WorkerConfig::from_env()?,
        })
    }
}

/// Watchlist scheduling settings.
#[derive(Debug, Clone)]
pub struct WatchlistSettings {
    pub interval: Duration,
    pub tick_budget: Duration,
    pub max_per_tick: usize,
    pub cooldown: Duration,
    pub retry_budget_per_artist: i32,
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            tick_budget: Duration::from_secs(8),
            max_per_tick: 50,
            cooldown: Duration::from_secs(3600),
            retry_budget_per_artist: 3,
        }
    }
}

/// Orchestrator configuration. All keys use the `HARMONY_` prefix; unknown
/// prefixed keys are ignored with a warning, invalid values fail bootstrap.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Global kill switch. When false only queue store reads run.
    pub workers_enabled: bool,
    pub global_concurrency: usize,
    /// Per-type pool sizes; missing types fall back to the global ceiling.
    pub pools: HashMap<String, usize>,
    /// Default priorities used by producers, per type.
    pub priorities: HashMap<String, i32>,
    pub poll_interval: Duration,
    pub poll_interval_max: Duration,
    pub visibility_timeouts: HashMap<String, Duration>,
    pub default_visibility_timeout: Duration,
    pub shutdown_grace: Duration,
    pub retry_profiles: HashMap<RetryProfileKind, RetryProfile>,
    pub watchlist: WatchlistSettings,
    pub dlq: DlqConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let mut retry_profiles = HashMap::new();
        // Downloads: large base, moderate cap.
        retry_profiles.insert(
            RetryProfileKind::Download,
            RetryProfile {
                max_attempts: 5,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(128),
                jitter_pct: 0.2,
            },
        );
        // Watchlist: small base, long span.
        retry_profiles.insert(
            RetryProfileKind::Watchlist,
            RetryProfile {
                max_attempts: 8,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(900),
                jitter_pct: 0.2,
            },
        );

        Self {
            workers_enabled: true,
            global_concurrency: 8,
            pools: HashMap::new(),
            priorities: HashMap::new(),
            poll_interval: Duration::from_millis(200),
            poll_interval_max: Duration::from_millis(5000),
            visibility_timeouts: HashMap::new(),
            default_visibility_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
            retry_profiles,
            watchlist: WatchlistSettings::default(),
            dlq: DlqConfig::default(),
        }
    }
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))
}

fn profile_for_suffix(suffix: &str) -> Option<RetryProfileKind> {
    match suffix.to_lowercase().as_str() {
        "download" => Some(RetryProfileKind::Download),
        "watchlist" => Some(RetryProfileKind::Watchlist),
        _ => None,
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        for (key, value) in env::vars() {
            let Some(rest) = key.strip_prefix("HARMONY_") else {
                continue;
            };

            match rest {
                "WORKERS_ENABLED" => cfg.workers_enabled = parse(&key, &value)?,
                "GLOBAL_CONCURRENCY" => cfg.global_concurrency = parse(&key, &value)?,
                "POLL_INTERVAL_MS" => {
                    cfg.poll_interval = Duration::from_millis(parse(&key, &value)?)
                }
                "POLL_INTERVAL_MAX_MS" => {
                    cfg.poll_interval_max = Duration::from_millis(parse(&key, &value)?)
                }
                "VISIBILITY_TIMEOUT_SECS" => {
                    cfg.default_visibility_timeout = Duration::from_secs(parse(&key, &value)?)
                }
                "SHUTDOWN_GRACE_MS" => {
                    cfg.shutdown_grace = Duration::from_millis(parse(&key, &value)?)
                }
                "WATCHLIST_INTERVAL_SECS" => {
                    cfg.watchlist.interval = Duration::from_secs(parse(&key, &value)?)
                }
                "WATCHLIST_TICK_BUDGET_MS" => {
                    cfg.watchlist.tick_budget = Duration::from_millis(parse(&key, &value)?)
                }
                "WATCHLIST_MAX_PER_TICK" => cfg.watchlist.max_per_tick = parse(&key, &value)?,
                "WATCHLIST_COOLDOWN_SECS" => {
                    cfg.watchlist.cooldown = Duration::from_secs(parse(&key, &value)?)
                }
                "WATCHLIST_RETRY_BUDGET" => {
                    cfg.watchlist.retry_budget_per_artist = parse(&key, &value)?
                }
                "DLQ_PAGE_SIZE_DEFAULT" => cfg.dlq.page_size_default = parse(&key, &value)?,
                "DLQ_PAGE_SIZE_MAX" => cfg.dlq.page_size_max = parse(&key, &value)?,
                "DLQ_REQUEUE_LIMIT" => cfg.dlq.requeue_limit = parse(&key, &value)?,
                "DLQ_PURGE_LIMIT" => cfg.dlq.purge_limit = parse(&key, &value)?,
                _ => {
                    if let Some(job_type) = rest.strip_prefix("POOL_") {
                        cfg.pools
                            .insert(job_type.to_lowercase(), parse(&key, &value)?);
                    } else if let Some(job_type) = rest.strip_prefix("PRIORITY_") {
                        cfg.priorities
                            .insert(job_type.to_lowercase(), parse(&key, &value)?);
                    } else if let Some(job_type) = rest.strip_prefix("VISIBILITY_TIMEOUT_SECS_") {
                        cfg.visibility_timeouts.insert(
                            job_type.to_lowercase(),
                            Duration::from_secs(parse(&key, &value)?),
                        );
                    } else if let Some(suffix) = rest.strip_prefix("RETRY_MAX_ATTEMPTS_") {
                        let Some(kind) = profile_for_suffix(suffix) else {
                            tracing::warn!(key = %key, "unknown retry profile, key ignored");
                            continue;
                        };
                        cfg.retry_profiles.entry(kind).or_default().max_attempts =
                            parse(&key, &value)?;
                    } else if let Some(suffix) = rest.strip_prefix("RETRY_BASE_DELAY_MS_") {
                        let Some(kind) = profile_for_suffix(suffix) else {
                            tracing::warn!(key = %key, "unknown retry profile, key ignored");
                            continue;
                        };
                        cfg.retry_profiles.entry(kind).or_default().base_delay =
                            Duration::from_millis(parse(&key, &value)?);
                    } else if let Some(suffix) = rest.strip_prefix("RETRY_JITTER_PCT_") {
                        let Some(kind) = profile_for_suffix(suffix) else {
                            tracing::warn!(key = %key, "unknown retry profile, key ignored");
                            continue;
                        };
                        cfg.retry_profiles.entry(kind).or_default().jitter_pct =
                            parse(&key, &value)?;
                    } else {
                        tracing::warn!(key = %key, "unknown configuration key ignored");
                    }
                }
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> Result<()> {
        if self.global_concurrency == 0 {
            anyhow::bail!("HARMONY_GLOBAL_CONCURRENCY must be at least 1");
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested_ms = self.poll_interval.as_millis() as u64,
                "poll interval below minimum, rounding up"
            );
            self.poll_interval = MIN_POLL_INTERVAL;
        }
        if self.poll_interval_max < self.poll_interval {
            anyhow::bail!("HARMONY_POLL_INTERVAL_MAX_MS must be >= HARMONY_POLL_INTERVAL_MS");
        }
        if self.watchlist.max_per_tick == 0 {
            anyhow::bail!("HARMONY_WATCHLIST_MAX_PER_TICK must be at least 1");
        }
        if self.dlq.page_size_max < self.dlq.page_size_default {
            anyhow::bail!("HARMONY_DLQ_PAGE_SIZE_MAX must be >= the default page size");
        }
        for profile in self.retry_profiles.values() {
            if profile.max_attempts < 1 {
                anyhow::bail!("retry profile max_attempts must be at least 1");
            }
        }
        Ok(())
    }

    /// Non-sensitive summary for the `worker.config` startup event.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "workers_enabled": self.workers_enabled,
            "global_concurrency": self.global_concurrency,
            "pools": self.pools,
            "priorities": self.priorities,
            "poll_interval_ms": self.poll_interval.as_millis() as u64,
            "poll_interval_max_ms": self.poll_interval_max.as_millis() as u64,
            "default_visibility_timeout_secs": self.default_visibility_timeout.as_secs(),
            "shutdown_grace_ms": self.shutdown_grace.as_millis() as u64,
            "retry_profiles": self.retry_profiles,
            "watchlist": {
                "interval_secs": self.watchlist.interval.as_secs(),
                "tick_budget_ms": self.watchlist.tick_budget.as_millis() as u64,
                "max_per_tick": self.watchlist.max_per_tick,
                "cooldown_secs": self.watchlist.cooldown.as_secs(),
                "retry_budget_per_artist": self.watchlist.retry_budget_per_artist,
            },
            "dlq": {
                "page_size_default": self.dlq.page_size_default,
                "page_size_max": self.dlq.page_size_max,
                "requeue_limit": self.dlq.requeue_limit,
                "purge_limit": self.dlq.purge_limit,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = WorkerConfig::default();
        assert!(cfg.workers_enabled);
        assert_eq!(cfg.global_concurrency, 8);
        assert_eq!(cfg.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.poll_interval_max, Duration::from_millis(5000));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert_eq!(cfg.retry_profiles.len(), 2);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut cfg = WorkerConfig {
            global_concurrency: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rounds_tiny_poll_interval_up() {
        let mut cfg = WorkerConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn validate_rejects_inverted_poll_bounds() {
        let mut cfg = WorkerConfig {
            poll_interval: Duration::from_millis(500),
            poll_interval_max: Duration::from_millis(100),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn summary_hides_nothing_sensitive_and_serializes() {
        let cfg = WorkerConfig::default();
        let summary = cfg.summary();
        assert_eq!(summary["global_concurrency"], 8);
        assert!(summary["retry_profiles"]["download"]["max_attempts"].is_number());
    }
}
