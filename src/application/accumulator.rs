//! Rolling trade statistics over the most recent closed trades.
//!
//! Grounded on the teacher's FIFO PnL reconstruction and Sharpe computation
//! (`domain/performance/calculator.rs`), adapted to consume already-closed
//! signals directly (the engine, not this module, resolves entry/exit) and
//! bounded to the most recent 250 trades so memory does not grow unbounded
//! across a long-running live strategy.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;

const CAPACITY: usize = 250;

#[derive(Debug, Clone)]
pub struct ClosedTradeRecord {
    pub symbol: String,
    pub strategy_name: String,
    pub pnl_percentage: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// A bounded FIFO of closed trades plus the statistics derived from them.
/// All statistics return `None` rather than a placeholder zero when the
/// sample is too small or degenerate (e.g. `sharpe` needs at least two
/// trades and a non-zero standard deviation) — callers must handle the
/// "not enough data yet" case explicitly rather than silently trusting 0.0.
pub struct TradeAccumulator {
    trades: VecDeque<ClosedTradeRecord>,
}

impl Default for TradeAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeAccumulator {
    pub fn new() -> Self {
        Self {
            trades: VecDeque::with_capacity(CAPACITY),
        }
    }

    pub fn push(&mut self, record: ClosedTradeRecord) {
        if self.trades.len() == CAPACITY {
            self.trades.pop_back();
        }
        self.trades.push_front(record);
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    fn returns_pct(&self) -> Vec<f64> {
        self.trades
            .iter()
            .filter_map(|t| t.pnl_percentage.to_f64())
            .collect()
    }

    pub fn win_rate(&self) -> Option<f64> {
        if self.trades.is_empty() {
            return None;
        }
        let wins = self.trades.iter().filter(|t| t.pnl_percentage > Decimal::ZERO).count();
        Some(wins as f64 / self.trades.len() as f64)
    }

    pub fn average_pnl(&self) -> Option<Decimal> {
        if self.trades.is_empty() {
            return None;
        }
        let total: Decimal = self.trades.iter().map(|t| t.pnl_percentage).sum();
        Some(total / Decimal::from(self.trades.len() as u64))
    }

    pub fn total_pnl(&self) -> Option<Decimal> {
        if self.trades.is_empty() {
            return None;
        }
        Some(self.trades.iter().map(|t| t.pnl_percentage).sum())
    }

    /// Sample standard deviation (n-1 denominator) of per-trade percent
    /// returns. Requires at least two trades.
    pub fn std_dev(&self) -> Option<f64> {
        let returns = self.returns_pct();
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// `mean / std_dev` over per-trade percent returns. `None` when there
    /// are fewer than two trades or the standard deviation is effectively
    /// zero (constant returns make the ratio undefined, not infinite).
    pub fn sharpe(&self) -> Option<f64> {
        let returns = self.returns_pct();
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let std_dev = self.std_dev()?;
        if std_dev <= 1e-9 {
            return None;
        }
        Some(mean / std_dev)
    }

    /// `win_rate / (1 - win_rate)`, a simple odds-style certainty ratio.
    /// `None` when undefined (no trades, or a 100% win rate with no losses
    /// to divide against).
    pub fn certainty_ratio(&self) -> Option<f64> {
        let win_rate = self.win_rate()?;
        if (1.0 - win_rate).abs() < 1e-9 {
            return None;
        }
        Some(win_rate / (1.0 - win_rate))
    }

    /// Projects the average per-trade return across 252 trades (one per
    /// trading day), as a rough annualized-return estimate. `None` when
    /// there is no average to project.
    pub fn expected_yearly_return(&self) -> Option<Decimal> {
        let average = self.average_pnl()?;
        Some(average * Decimal::from(252))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(pnl: Decimal) -> ClosedTradeRecord {
        ClosedTradeRecord {
            symbol: "BTCUSDT".to_string(),
            strategy_name: "dual_sma".to_string(),
            pnl_percentage: pnl,
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_accumulator_returns_none_everywhere() {
        let accumulator = TradeAccumulator::new();
        assert_eq!(accumulator.win_rate(), None);
        assert_eq!(accumulator.average_pnl(), None);
        assert_eq!(accumulator.sharpe(), None);
        assert_eq!(accumulator.certainty_ratio(), None);
    }

    #[test]
    fn test_win_rate_and_average() {
        let mut accumulator = TradeAccumulator::new();
        accumulator.push(record(dec!(10)));
        accumulator.push(record(dec!(-10)));
        accumulator.push(record(dec!(10)));

        assert_eq!(accumulator.win_rate(), Some(2.0 / 3.0));
        assert_eq!(accumulator.average_pnl(), Some(dec!(10) / dec!(3)));
    }

    #[test]
    fn test_sharpe_zero_std_dev_is_none() {
        let mut accumulator = TradeAccumulator::new();
        accumulator.push(record(dec!(10)));
        accumulator.push(record(dec!(10)));
        assert_eq!(accumulator.sharpe(), None);
    }

    #[test]
    fn test_sharpe_positive_for_consistent_small_edge() {
        let mut accumulator = TradeAccumulator::new();
        accumulator.push(record(dec!(10)));
        accumulator.push(record(dec!(5)));
        assert!(accumulator.sharpe().unwrap() > 1.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut accumulator = TradeAccumulator::new();
        for i in 0..(CAPACITY + 10) {
            accumulator.push(record(Decimal::from(i as i64)));
        }
        assert_eq!(accumulator.len(), CAPACITY);
        // Most recently pushed trade is at the front.
        assert_eq!(
            accumulator.trades.front().unwrap().pnl_percentage,
            Decimal::from((CAPACITY + 9) as i64)
        );
    }

    #[test]
    fn test_certainty_ratio_undefined_at_100_percent_win_rate() {
        let mut accumulator = TradeAccumulator::new();
        accumulator.push(record(dec!(10)));
        accumulator.push(record(dec!(5)));
        assert_eq!(accumulator.certainty_ratio(), None);
    }
}
