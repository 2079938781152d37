use std::env;

/// Price feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upstream price source URL. None disables the HTTP source; ticks can
    /// still be pushed locally (tests, simulations).
    pub source_url: Option<String>,
    /// Poll interval for the HTTP source (ms).
    pub poll_ms: u64,
    /// Per-market tick queue capacity. Overflow drops the oldest tick.
    pub queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            poll_ms: 1_000,
            queue_capacity: 256,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database path. None uses an in-memory database.
    pub database_path: Option<String>,
    /// Paper collateral credited to new accounts (USDC).
    pub starting_balance: f64,
    /// Maintenance margin ratio used in liquidation prices.
    pub maintenance_margin_ratio: f64,
    /// Smallest notional a mirror open may have; smaller mirrors are skipped.
    pub min_mirror_notional: f64,
    /// Minimum referral commission withdrawal (USD).
    pub min_withdrawal: f64,
    /// Price feed configuration.
    pub feed: FeedConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3003);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").ok(),
            starting_balance: env::var("STARTING_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            maintenance_margin_ratio: env::var("MAINTENANCE_MARGIN_RATIO")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.005),
            min_mirror_notional: env::var("MIN_MIRROR_NOTIONAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            min_withdrawal: env::var("MIN_WITHDRAWAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            feed: FeedConfig {
                source_url: env::var("FEED_URL").ok(),
                poll_ms: env::var("FEED_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1_000),
                queue_capacity: env::var("FEED_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(256),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3003,
            database_path: None,
            starting_balance: 10_000.0,
            maintenance_margin_ratio: 0.005,
            min_mirror_notional: 10.0,
            min_withdrawal: 1.0,
            feed: FeedConfig::default(),
        }
    }
}
