//! Volume-weighted average price — the engine's canonical "current price".

use crate::domain::candle::{warn_if_thin_window, Candle, CandleSource};
use crate::domain::context::ExecutionContext;
use crate::domain::errors::EngineError;
use chrono::Duration;
use rust_decimal::Decimal;

/// `(high + low + close) / 3`.
pub fn typical_price(candle: &Candle) -> Decimal {
    (candle.high + candle.low + candle.close) / Decimal::from(3)
}

/// VWAP over `candles`: `Σ(typical·volume) / Σ volume`, falling back to the
/// arithmetic mean of `close` when total volume is zero. Panics-free for an
/// empty slice is not guaranteed by contract — callers always pass a
/// non-empty window (the one invariant [`CandleSource::fetch`] upholds).
pub fn vwap(candles: &[Candle]) -> Decimal {
    debug_assert!(!candles.is_empty(), "vwap requires a non-empty window");
    if candles.is_empty() {
        return Decimal::ZERO;
    }

    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        let count = Decimal::from(candles.len() as u64);
        return candles.iter().map(|c| c.close).sum::<Decimal>() / count;
    }

    let weighted: Decimal = candles
        .iter()
        .map(|c| typical_price(c) * c.volume)
        .sum();
    weighted / total_volume
}

/// The canonical "current price": VWAP over the last `window` candles
/// ending at (inclusive of) `ctx.when`. The look-ahead rule permits
/// inclusiveness; this implementation chooses it, per an explicit Open
/// Question decision recorded in DESIGN.md.
pub async fn current_price(
    source: &CandleSource,
    symbol: &str,
    interval: Duration,
    window: usize,
) -> Result<Decimal, EngineError> {
    let candles = source.fetch(symbol, interval, window).await?;
    warn_if_thin_window(symbol, &candles);
    Ok(vwap(&candles))
}
