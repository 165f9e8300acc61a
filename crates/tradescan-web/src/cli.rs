//! Server configuration.
//!
//! Every option can be given as a flag or through the environment variable named in
//! the table; flags win.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HOST` | `0.0.0.0` | Bind address |
//! | `PORT` | `5000` | Bind port |
//! | `COINGECKO_API_URL` | public v3 API | Market snapshot provider |
//! | `COINGECKO_API_KEY` | unset | Demo-tier key |
//! | `BINANCE_FUTURES_API_URL` | `fapi/v1` | Candle provider |
//! | `CACHE_TTL` | `300` | Cache TTL in seconds |
//! | `CACHE_MAX_SIZE` | `1000` | Cache entry cap |
//! | `COINGECKO_RATE_LIMIT` | `50` | Calls per window |
//! | `BINANCE_RATE_LIMIT` | `1000` | Calls per window |
//! | `RATE_LIMIT_WINDOW` | `60` | Window in seconds |
//! | `RATE_LIMIT_MODE` | `reject` | `reject` or `wait` |
//! | `SNAPSHOT_SIZE` | `250` | Base snapshot page size |
//! | `SCAN_CONCURRENCY` | `10` | Parallel candle fetches |
//! | `ASIAN_RANGE_SESSION` | `thursday-ny` | `thursday-ny` or `friday-asia` |
//! | `ASIAN_RANGE_ENABLED` | `true` | Background Asian-range refresh |
//! | `CORS_ORIGINS` | `*` | Comma-separated origins |
//! | `LOG_LEVEL` | `info` | Used when `RUST_LOG` is unset |

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use clap::{ArgAction, Parser};
use tradescan_core::adapters::{binance, coingecko};
use tradescan_core::{
    AsianRangeConfig, CacheConfig, ScannerConfig, SessionSpec, ThrottleConfig, ThrottleMode,
};

/// Crypto market scanner with Fibonacci levels and Asian-range references.
#[derive(Debug, Clone, Parser)]
#[command(name = "tradescan", author, version, about)]
pub struct Cli {
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    #[arg(long, env = "COINGECKO_API_URL", default_value = coingecko::DEFAULT_BASE_URL)]
    pub coingecko_api_url: String,

    /// Sent as `x-cg-demo-api-key` when set.
    #[arg(long, env = "COINGECKO_API_KEY", hide_env_values = true)]
    pub coingecko_api_key: Option<String>,

    #[arg(long, env = "BINANCE_FUTURES_API_URL", default_value = binance::DEFAULT_BASE_URL)]
    pub binance_futures_api_url: String,

    /// Default cache TTL in seconds; `0` disables caching.
    #[arg(long, env = "CACHE_TTL", default_value_t = 300)]
    pub cache_ttl: u64,

    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 1_000)]
    pub cache_max_size: usize,

    #[arg(long, env = "COINGECKO_RATE_LIMIT", default_value_t = 50)]
    pub coingecko_rate_limit: u32,

    #[arg(long, env = "BINANCE_RATE_LIMIT", default_value_t = 1_000)]
    pub binance_rate_limit: u32,

    /// Rate-limit window in seconds, shared by both providers.
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window: u64,

    #[arg(long, env = "RATE_LIMIT_MODE", default_value = "reject")]
    pub rate_limit_mode: ThrottleMode,

    /// Upper bound on a Wait-mode rate-limit wait, in seconds.
    #[arg(long, env = "RATE_LIMIT_MAX_WAIT")]
    pub rate_limit_max_wait: Option<u64>,

    #[arg(
        long,
        env = "SNAPSHOT_SIZE",
        default_value_t = 250,
        value_parser = clap::value_parser!(u16).range(1..=250)
    )]
    pub snapshot_size: u16,

    #[arg(long, env = "SCAN_CONCURRENCY", default_value_t = 10)]
    pub scan_concurrency: usize,

    #[arg(long, env = "ASIAN_RANGE_SESSION", default_value = "thursday-ny")]
    pub asian_range_session: SessionSpec,

    #[arg(long, env = "ASIAN_RANGE_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub asian_range_enabled: bool,

    /// `*` for any origin, otherwise a comma-separated list.
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache_ttl),
            max_size: self.cache_max_size,
        }
    }

    pub fn coingecko_throttle(&self) -> ThrottleConfig {
        self.throttle(self.coingecko_rate_limit)
    }

    pub fn binance_throttle(&self) -> ThrottleConfig {
        self.throttle(self.binance_rate_limit)
    }

    fn throttle(&self, limit: u32) -> ThrottleConfig {
        let config = ThrottleConfig::new(limit, Duration::from_secs(self.rate_limit_window))
            .with_mode(self.rate_limit_mode);
        match self.rate_limit_max_wait {
            Some(secs) => config.with_max_wait(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            snapshot_size: usize::from(self.snapshot_size),
            ..ScannerConfig::default()
        }
    }

    pub fn asian_range_config(&self) -> AsianRangeConfig {
        AsianRangeConfig {
            enabled: self.asian_range_enabled,
            session: self.asian_range_session,
            max_concurrency: self.scan_concurrency.max(1),
            ..AsianRangeConfig::default()
        }
    }

    /// `None` means any origin.
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        let trimmed = self.cors_origins.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return None;
        }
        Some(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }
}
