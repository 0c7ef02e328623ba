//! OHLCV candles and the adapter contract used to fetch them.

use crate::domain::context::ExecutionContext;
use crate::domain::errors::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// An immutable OHLCV bar. Candle slices are ordered by `timestamp` strictly
/// ascending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// User-supplied raw adapter: fetch up to `limit` candles ending at or
/// before `since`. Implementors need not worry about look-ahead — the
/// wrapping [`CandleSource`] clips the result to the ambient
/// [`ExecutionContext::current`] instant.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn fetch_since(
        &self,
        symbol: &str,
        interval: Duration,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}

/// Core wrapper around a user-supplied [`CandleFeed`]. Callers never pass
/// `since` directly — it is derived from `(ctx.when, interval, limit)` —
/// and every candle returned is guaranteed `timestamp <= ctx.when`.
#[derive(Clone)]
pub struct CandleSource {
    feed: Arc<dyn CandleFeed>,
}

impl CandleSource {
    pub fn new(feed: Arc<dyn CandleFeed>) -> Self {
        Self { feed }
    }

    /// Fetches up to `limit` candles contiguous backward from the ambient
    /// `ctx.when`. Fails with `NoData` if the adapter errors or returns an
    /// empty window; a short (but non-empty) window is not fatal here —
    /// individual consumers (VWAP) decide whether `< 5` candles matters.
    pub async fn fetch(
        &self,
        symbol: &str,
        interval: Duration,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let ctx = ExecutionContext::current()?;
        let since = ctx.when - interval * (limit as i32);

        let candles = self
            .feed
            .fetch_since(symbol, interval, since, limit)
            .await
            .map_err(|e| EngineError::NoData {
                symbol: symbol.to_string(),
                interval: format!("{interval}"),
                reason: e.to_string(),
            })?;

        let mut clipped: Vec<Candle> = candles
            .into_iter()
            .filter(|c| c.timestamp <= ctx.when)
            .collect();
        clipped.sort_by_key(|c| c.timestamp);

        if clipped.is_empty() {
            return Err(EngineError::NoData {
                symbol: symbol.to_string(),
                interval: format!("{interval}"),
                reason: "adapter returned no candles at or before ctx.when".to_string(),
            });
        }

        Ok(clipped)
    }

    /// Fetches up to `limit` candles forward from `since`, bypassing the
    /// ambient `ExecutionContext` clip. This is the deliberate escape hatch
    /// the backtest scheduler uses to pull the candles needed to resolve a
    /// just-opened signal in one jump — never call this from strategy or
    /// observer code, where it would reintroduce look-ahead.
    pub async fn fetch_forward(
        &self,
        symbol: &str,
        interval: Duration,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut candles = self
            .feed
            .fetch_since(symbol, interval, since, limit)
            .await
            .map_err(|e| EngineError::NoData {
                symbol: symbol.to_string(),
                interval: format!("{interval}"),
                reason: e.to_string(),
            })?;
        candles.sort_by_key(|c| c.timestamp);

        if candles.is_empty() {
            return Err(EngineError::NoData {
                symbol: symbol.to_string(),
                interval: format!("{interval}"),
                reason: "adapter returned no forward candles".to_string(),
            });
        }

        Ok(candles)
    }
}

/// Logs (not fails) when a VWAP consumer receives fewer than 5 candles.
pub fn warn_if_thin_window(symbol: &str, candles: &[Candle]) {
    if candles.len() < 5 {
        warn!(symbol, count = candles.len(), "thin candle window for VWAP consumer");
    }
}
