//! ETL configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::etl::rate_limiter::RateLimitConfig;

/// Default batch size for raw record inserts.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default upstream request budget per window.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;

/// Default rate limit window in seconds.
pub const DEFAULT_RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Default retry budget for retryable failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff delay in seconds.
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 1;

/// Default backoff cap in seconds.
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 60;

pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_COINGECKO_VS_CURRENCY: &str = "usd";
pub const DEFAULT_COINGECKO_PAGE_SIZE: u32 = 100;

pub const DEFAULT_COINPAPRIKA_BASE_URL: &str = "https://api.coinpaprika.com/v1";
pub const DEFAULT_COINPAPRIKA_SNAPSHOT_LIMIT: usize = 100;

/// Default per-request timeout for REST sources, in seconds.
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;

/// Default CSV drop directory.
pub const DEFAULT_CSV_DATA_DIR: &str = "./data/csv";

/// CoinGecko source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub vs_currency: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            api_key: None,
            vs_currency: DEFAULT_COINGECKO_VS_CURRENCY.to_string(),
            page_size: DEFAULT_COINGECKO_PAGE_SIZE,
            timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
        }
    }
}

/// CoinPaprika source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinPaprikaConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// How many of the top tickers each snapshot keeps.
    pub snapshot_limit: usize,
    pub timeout_secs: u64,
}

impl Default for CoinPaprikaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COINPAPRIKA_BASE_URL.to_string(),
            api_key: None,
            snapshot_limit: DEFAULT_COINPAPRIKA_SNAPSHOT_LIMIT,
            timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
        }
    }
}

/// CSV source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSourceConfig {
    pub directory: PathBuf,
}

impl Default for CsvSourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_CSV_DATA_DIR),
        }
    }
}

/// Pipeline-wide ETL configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub batch_size: usize,
    pub rate_limit: RateLimitConfig,
    pub coingecko: CoinGeckoConfig,
    pub coinpaprika: CoinPaprikaConfig,
    pub csv: CsvSourceConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: RateLimitConfig::default(),
            coingecko: CoinGeckoConfig::default(),
            coinpaprika: CoinPaprikaConfig::default(),
            csv: CsvSourceConfig::default(),
        }
    }
}

impl EtlConfig {
    /// Load ETL settings from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            batch_size: env_parse("ETL_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            rate_limit: RateLimitConfig {
                requests_per_period: env_parse(
                    "ETL_RATE_LIMIT_REQUESTS",
                    DEFAULT_RATE_LIMIT_REQUESTS,
                ),
                period: Duration::from_secs(env_parse(
                    "ETL_RATE_LIMIT_PERIOD_SECS",
                    DEFAULT_RATE_LIMIT_PERIOD_SECS,
                )),
                max_retries: env_parse("ETL_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base_delay: Duration::from_secs(env_parse(
                    "ETL_RETRY_BASE_DELAY_SECS",
                    DEFAULT_RETRY_BASE_DELAY_SECS,
                )),
                max_delay: Duration::from_secs(env_parse(
                    "ETL_RETRY_MAX_DELAY_SECS",
                    DEFAULT_RETRY_MAX_DELAY_SECS,
                )),
                jitter: env_parse("ETL_RETRY_JITTER", false),
            },
            coingecko: CoinGeckoConfig {
                base_url: env_string("COINGECKO_BASE_URL", DEFAULT_COINGECKO_BASE_URL),
                api_key: std::env::var("COINGECKO_API_KEY").ok().filter(|s| !s.is_empty()),
                vs_currency: env_string("COINGECKO_VS_CURRENCY", DEFAULT_COINGECKO_VS_CURRENCY),
                page_size: env_parse("COINGECKO_PAGE_SIZE", DEFAULT_COINGECKO_PAGE_SIZE),
                timeout_secs: env_parse("COINGECKO_TIMEOUT_SECS", DEFAULT_SOURCE_TIMEOUT_SECS),
            },
            coinpaprika: CoinPaprikaConfig {
                base_url: env_string("COINPAPRIKA_BASE_URL", DEFAULT_COINPAPRIKA_BASE_URL),
                api_key: std::env::var("COINPAPRIKA_API_KEY").ok().filter(|s| !s.is_empty()),
                snapshot_limit: env_parse(
                    "COINPAPRIKA_SNAPSHOT_LIMIT",
                    DEFAULT_COINPAPRIKA_SNAPSHOT_LIMIT,
                ),
                timeout_secs: env_parse("COINPAPRIKA_TIMEOUT_SECS", DEFAULT_SOURCE_TIMEOUT_SECS),
            },
            csv: CsvSourceConfig {
                directory: PathBuf::from(env_string("CSV_DATA_DIR", DEFAULT_CSV_DATA_DIR)),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("ETL batch_size must be greater than 0");
        }
        if self.rate_limit.requests_per_period == 0 {
            anyhow::bail!("Rate limit requests_per_period must be greater than 0");
        }
        if self.rate_limit.period.is_zero() {
            anyhow::bail!("Rate limit period must be greater than 0");
        }
        if self.rate_limit.base_delay > self.rate_limit.max_delay {
            anyhow::bail!(
                "Retry base_delay ({:?}) cannot be greater than max_delay ({:?})",
                self.rate_limit.base_delay,
                self.rate_limit.max_delay
            );
        }
        // CoinGecko rejects per_page outside 1..=250
        if self.coingecko.page_size == 0 || self.coingecko.page_size > 250 {
            anyhow::bail!(
                "CoinGecko page_size must be in 1..=250, got {}",
                self.coingecko.page_size
            );
        }
        if self.coinpaprika.snapshot_limit == 0 {
            anyhow::bail!("CoinPaprika snapshot_limit must be greater than 0");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
