//! Environment-driven engine configuration, read once at startup.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Round-trip slippage, in percent (e.g. `0.05` for 0.05%).
    pub percent_slippage: Decimal,
    /// Round-trip fee, in percent.
    pub percent_fee: Decimal,
    /// Maximum time a scheduled signal waits for activation.
    pub schedule_await: Duration,
    /// Candle window size for `getAveragePrice` (VWAP).
    pub avg_price_candles_count: usize,
    /// Upper bound on `minuteEstimatedTime` accepted by the validator.
    pub max_minute_estimated_time: i64,
    /// Root directory for persisted signal snapshots and reports.
    pub dump_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            percent_slippage: Decimal::new(5, 2),  // 0.05%
            percent_fee: Decimal::new(5, 2),        // 0.05%
            schedule_await: Duration::from_secs(120 * 60),
            avg_price_candles_count: 5,
            max_minute_estimated_time: 30 * 24 * 60,
            dump_dir: "./dump".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable. `RUST_LOG` is consumed
    /// directly by `tracing_subscriber::EnvFilter` and is not read here.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            percent_slippage: env_decimal("CC_PERCENT_SLIPPAGE", defaults.percent_slippage),
            percent_fee: env_decimal("CC_PERCENT_FEE", defaults.percent_fee),
            schedule_await: env_minutes("CC_SCHEDULE_AWAIT_MINUTES", defaults.schedule_await),
            avg_price_candles_count: env_parsed(
                "CC_AVG_PRICE_CANDLES_COUNT",
                defaults.avg_price_candles_count,
            ),
            max_minute_estimated_time: env_parsed(
                "CC_MAX_MINUTE_ESTIMATED_TIME",
                defaults.max_minute_estimated_time,
            ),
            dump_dir: std::env::var("DUMP_DIR").unwrap_or(defaults.dump_dir),
        }
    }

    /// Round-trip cost as a fraction (not percent) of `priceOpen`, the form
    /// `SignalValidator` and `MilestoneTracker`'s breakeven check consume.
    pub fn round_trip_cost_fraction(&self) -> Decimal {
        (self.percent_slippage + self.percent_fee) * Decimal::from(2) / Decimal::from(100)
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|value| Decimal::from_str(&value).ok())
        .unwrap_or(default)
}

fn env_minutes(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(|minutes| Duration::from_secs(minutes * 60))
        .unwrap_or(default)
}
