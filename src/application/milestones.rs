//! Tracks which profit/loss progress milestones a pending signal has
//! already crossed, so the engine emits each breakeven / partial-profit /
//! partial-loss event exactly once per signal, and arbitrates trailing
//! stop-loss proposals so the stop only ever moves in one direction per
//! signal.
//!
//! Progress is measured relative to the signal's own TP/SL distance, not
//! raw PnL percent: a signal with a 60% TP distance that is up 25% has
//! crossed 25/60 ≈ 42% of the way to target, which buckets to the 40%
//! milestone — not the 20% one a raw-PnL reading would suggest.

use crate::domain::signal::Position;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

const LEVELS: [u8; 9] = [10, 20, 30, 40, 50, 60, 70, 80, 90];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingDirection {
    /// Stop-loss moves toward entry, reducing risk — the direction the
    /// first accepted trailing-stop call always locks in practice.
    Tighten,
    /// Stop-loss moves away from entry. Never proposed by the engine
    /// itself; kept distinct so a user-supplied rule that asks for it is
    /// rejected once the opposite direction is already locked in.
    Loosen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneEvent {
    Breakeven,
    PartialProfit(u8),
    PartialLoss(u8),
}

/// Distances (as positive percentages of `priceOpen`) used to convert raw
/// PnL into TP/SL progress. Computed once from the signal at pending time.
#[derive(Debug, Clone, Copy)]
pub struct ProgressDistances {
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
}

impl ProgressDistances {
    pub fn from_signal(
        position: Position,
        price_open: Decimal,
        price_take_profit: Decimal,
        price_stop_loss: Decimal,
    ) -> Self {
        let take_profit_pct = match position {
            Position::Long => (price_take_profit - price_open) / price_open,
            Position::Short => (price_open - price_take_profit) / price_open,
        }
        .abs()
            * Decimal::from(100);
        let stop_loss_pct = match position {
            Position::Long => (price_open - price_stop_loss) / price_open,
            Position::Short => (price_stop_loss - price_open) / price_open,
        }
        .abs()
            * Decimal::from(100);
        Self {
            take_profit_pct,
            stop_loss_pct,
        }
    }
}

/// Default breakeven threshold: 30% progress toward take-profit.
pub fn default_breakeven_threshold_pct() -> Decimal {
    Decimal::from(30)
}

/// Per-signal dedup state. A fresh tracker is created when a signal opens
/// and discarded when it closes — milestones never carry over between
/// signals.
pub struct MilestoneTracker {
    distances: ProgressDistances,
    breakeven_threshold_pct: Decimal,
    breakeven_fired: bool,
    profit_fired: BTreeSet<u8>,
    loss_fired: BTreeSet<u8>,
    trailing_direction: Option<TrailingDirection>,
}

impl MilestoneTracker {
    pub fn new(distances: ProgressDistances) -> Self {
        Self {
            distances,
            breakeven_threshold_pct: default_breakeven_threshold_pct(),
            breakeven_fired: false,
            profit_fired: BTreeSet::new(),
            loss_fired: BTreeSet::new(),
            trailing_direction: None,
        }
    }

    pub fn with_breakeven_threshold_pct(mut self, threshold: Decimal) -> Self {
        self.breakeven_threshold_pct = threshold;
        self
    }

    /// Evaluates `pnl_percentage` (signed, relative to `priceOpen`) against
    /// breakeven and the 10%-step progress ladder, returning every newly
    /// crossed event exactly once. A reversal that re-crosses a level does
    /// not re-fire it.
    pub fn evaluate(&mut self, pnl_percentage: Decimal) -> Vec<MilestoneEvent> {
        let mut events = Vec::new();

        if pnl_percentage > Decimal::ZERO && self.distances.take_profit_pct > Decimal::ZERO {
            let progress_pct = pnl_percentage / self.distances.take_profit_pct * Decimal::from(100);

            if !self.breakeven_fired && progress_pct >= self.breakeven_threshold_pct {
                self.breakeven_fired = true;
                events.push(MilestoneEvent::Breakeven);
            }

            for level in LEVELS {
                if progress_pct >= Decimal::from(level) && !self.profit_fired.contains(&level) {
                    self.profit_fired.insert(level);
                    events.push(MilestoneEvent::PartialProfit(level));
                }
            }
        } else if pnl_percentage < Decimal::ZERO && self.distances.stop_loss_pct > Decimal::ZERO {
            let magnitude = -pnl_percentage;
            let progress_pct = magnitude / self.distances.stop_loss_pct * Decimal::from(100);

            for level in LEVELS {
                if progress_pct >= Decimal::from(level) && !self.loss_fired.contains(&level) {
                    self.loss_fired.insert(level);
                    events.push(MilestoneEvent::PartialLoss(level));
                }
            }
        }

        events
    }

    /// Decides whether a proposed stop-loss move should be accepted. The
    /// first accepted proposal locks the signal's trailing direction;
    /// subsequent proposals in the opposite direction are silently rejected
    /// (`None`) rather than reversing a stop that already moved to reduce
    /// risk.
    pub fn propose_trailing_stop(
        &mut self,
        current_sl: Decimal,
        proposed_sl: Decimal,
        position: Position,
    ) -> Option<Decimal> {
        if proposed_sl == current_sl {
            return None;
        }

        let moves_toward_entry = match position {
            Position::Long => proposed_sl > current_sl,
            Position::Short => proposed_sl < current_sl,
        };
        let direction = if moves_toward_entry {
            TrailingDirection::Tighten
        } else {
            TrailingDirection::Loosen
        };

        match self.trailing_direction {
            None => {
                self.trailing_direction = Some(direction);
                Some(proposed_sl)
            }
            Some(locked) if locked == direction => Some(proposed_sl),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_distances(tp_pct: Decimal, sl_pct: Decimal) -> ProgressDistances {
        ProgressDistances {
            take_profit_pct: tp_pct,
            stop_loss_pct: sl_pct,
        }
    }

    #[test]
    fn test_breakeven_fires_once_past_threshold() {
        let mut tracker = MilestoneTracker::new(long_distances(dec!(10), dec!(10)));
        // 2% progress of a 10% TP distance = 20% progress < 30% threshold.
        assert_eq!(tracker.evaluate(dec!(2)), vec![MilestoneEvent::PartialProfit(10), MilestoneEvent::PartialProfit(20)]);
        // 4% of 10% = 40% progress, past the 30% breakeven threshold.
        let events = tracker.evaluate(dec!(4));
        assert!(events.contains(&MilestoneEvent::Breakeven));
        // Second crossing does not re-fire breakeven.
        assert!(!tracker.evaluate(dec!(4.5)).contains(&MilestoneEvent::Breakeven));
    }

    #[test]
    fn test_scenario_s5_partial_profit_dedup() {
        // priceOpen=100000, TP=160000, SL=50000 -> tp_distance=60%, sl_distance=50%
        let distances = ProgressDistances::from_signal(
            Position::Long,
            dec!(100000),
            dec!(160000),
            dec!(50000),
        );
        assert_eq!(distances.take_profit_pct, dec!(60));

        let mut tracker = MilestoneTracker::new(distances);
        // +25% pnl -> progress = 25/60*100 ≈ 41.67 -> levels 10,20,30,40 and breakeven (>=30%).
        let events = tracker.evaluate(dec!(25));
        assert!(events.contains(&MilestoneEvent::PartialProfit(10)));
        assert!(events.contains(&MilestoneEvent::PartialProfit(20)));
        assert!(events.contains(&MilestoneEvent::PartialProfit(30)));
        assert!(events.contains(&MilestoneEvent::PartialProfit(40)));
        assert!(!events.contains(&MilestoneEvent::PartialProfit(50)));

        // Retreat to +12%: progress = 20%, no new events (10,20 already fired).
        assert_eq!(tracker.evaluate(dec!(12)), Vec::new());

        // Rise to +35%: progress ≈ 58.3% newly crosses the 50% level.
        // Monotonic progress must keep firing newly crossed levels — a
        // narrative reading that nothing fires here would contradict
        // invariant 4 (each level fires once, not that later levels are
        // skipped once an earlier one has fired).
        assert_eq!(tracker.evaluate(dec!(35)), vec![MilestoneEvent::PartialProfit(50)]);
    }

    #[test]
    fn test_loss_levels_use_sl_distance_and_absolute_magnitude() {
        let distances = long_distances(dec!(60), dec!(50));
        let mut tracker = MilestoneTracker::new(distances);
        // -15% pnl -> progress = 15/50*100 = 30%.
        let events = tracker.evaluate(dec!(-15));
        assert_eq!(events, vec![MilestoneEvent::PartialLoss(10), MilestoneEvent::PartialLoss(20), MilestoneEvent::PartialLoss(30)]);
    }

    #[test]
    fn test_trailing_stop_locks_direction_for_long() {
        let mut tracker = MilestoneTracker::new(long_distances(dec!(10), dec!(10)));
        assert_eq!(
            tracker.propose_trailing_stop(dec!(41000), dec!(41500), Position::Long),
            Some(dec!(41500))
        );
        assert_eq!(
            tracker.propose_trailing_stop(dec!(41500), dec!(41800), Position::Long),
            Some(dec!(41800))
        );
        assert_eq!(
            tracker.propose_trailing_stop(dec!(41800), dec!(41200), Position::Long),
            None
        );
    }

    #[test]
    fn test_trailing_stop_locks_direction_for_short() {
        let mut tracker = MilestoneTracker::new(long_distances(dec!(10), dec!(10)));
        assert_eq!(
            tracker.propose_trailing_stop(dec!(41000), dec!(40500), Position::Short),
            Some(dec!(40500))
        );
        assert_eq!(
            tracker.propose_trailing_stop(dec!(40500), dec!(41200), Position::Short),
            None
        );
    }

    #[test]
    fn test_unchanged_stop_is_rejected() {
        let mut tracker = MilestoneTracker::new(long_distances(dec!(10), dec!(10)));
        assert_eq!(tracker.propose_trailing_stop(dec!(41000), dec!(41000), Position::Long), None);
    }
}
