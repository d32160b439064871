use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PRICE_API_BASE: &str = "https://api.coingecko.com/api/v3";

#[derive(Clone, Debug)]
pub struct Config {
    pub price_api_base: String,
    /// Pool feed is disabled when unset.
    pub pool_stats_url: Option<String>,
    pub price_poll_secs: u64,
    pub pool_poll_secs: u64,
    pub history_cap: usize,
    pub store_path: String,
    pub export_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub toast_cap: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            price_api_base: std::env::var("PRICE_API_BASE").unwrap_or_else(|_| DEFAULT_PRICE_API_BASE.to_string()),
            pool_stats_url: std::env::var("POOL_STATS_URL").ok().filter(|v| !v.trim().is_empty()),
            price_poll_secs: std::env::var("PRICE_POLL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            pool_poll_secs: std::env::var("POOL_POLL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            history_cap: std::env::var("HISTORY_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            store_path: std::env::var("STORE_PATH").unwrap_or_else(|_| "./poolwatch.sqlite".to_string()),
            export_dir: std::env::var("EXPORT_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./exports")),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            toast_cap: std::env::var("TOAST_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
        }
    }

    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_secs.max(1))
    }

    pub fn pool_interval(&self) -> Duration {
        Duration::from_secs(self.pool_poll_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            price_api_base: DEFAULT_PRICE_API_BASE.to_string(),
            pool_stats_url: None,
            price_poll_secs: 60,
            pool_poll_secs: 30,
            history_cap: 100,
            store_path: "./poolwatch.sqlite".to_string(),
            export_dir: PathBuf::from("./exports"),
            http_timeout_secs: 10,
            toast_cap: 20,
        }
    }
}
